//! Tool Protocol Abstraction Layer
//!
//! Shared vocabulary between the tool server and the agent side: tool descriptors with their
//! argument schema, the normalized [`ToolCallResult`], and the [`ToolProtocol`] trait that both a
//! remote [`ToolSession`](crate::session::ToolSession) and an in-process
//! [`Dispatcher`](crate::dispatcher::Dispatcher) implement.
//!
//! # Architecture
//!
//! ```text
//! ToolAgent → ToolProtocol (trait) → [ToolSession (SSE) | Dispatcher (in-process)]
//! ```
//!
//! # Example
//!
//! ```rust
//! use toolbridge::tool_protocol::{ToolDescriptor, ToolParameter, ToolParameterType};
//!
//! let weather = ToolDescriptor::new("weather", "Current weather for a city").with_parameter(
//!     ToolParameter::new("city", ToolParameterType::String)
//!         .with_description("City name, e.g. Paris")
//!         .required(),
//! );
//! assert_eq!(weather.primary_text_parameter(), Some("city"));
//! ```

use crate::resource_protocol::{ResourceContents, ResourceDescriptor, ResourceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt;

/// Named arguments of a tool invocation.
pub type Arguments = Map<String, Value>;

/// Defines the type of a tool parameter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    /// JSON-Schema type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }

    fn from_schema_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ToolParameterType::String),
            "number" => Some(ToolParameterType::Number),
            "integer" => Some(ToolParameterType::Integer),
            "boolean" => Some(ToolParameterType::Boolean),
            "array" => Some(ToolParameterType::Array),
            "object" => Some(ToolParameterType::Object),
            _ => None,
        }
    }

    /// Whether `value` is acceptable for a parameter of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ToolParameterType::String => value.is_string(),
            ToolParameterType::Number => value.is_number(),
            ToolParameterType::Integer => value.is_i64() || value.is_u64(),
            ToolParameterType::Boolean => value.is_boolean(),
            ToolParameterType::Array => value.is_array(),
            ToolParameterType::Object => value.is_object(),
        }
    }
}

/// Defines a parameter for a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    /// Define a new optional parameter with the provided name and type.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    /// Add a human readable description that will surface in the advertised schema.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Immutable description of a registered tool, as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", with = "input_schema", default)]
    pub parameters: Vec<ToolParameter>,
    /// False when the server knows the tool cannot run (e.g. its credential is missing).
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl ToolDescriptor {
    /// Create a descriptor with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            available: true,
        }
    }

    /// Append a parameter definition.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_availability(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// The parameter a free-text topic maps onto: the first required string parameter, or the
    /// first string parameter at all.
    pub fn primary_text_parameter(&self) -> Option<&str> {
        let strings = || {
            self.parameters
                .iter()
                .filter(|p| p.param_type == ToolParameterType::String)
        };
        strings()
            .find(|p| p.required)
            .or_else(|| strings().next())
            .map(|p| p.name.as_str())
    }

    /// Check `arguments` against the declared schema.
    ///
    /// Unknown fields are rejected, required fields must be present and every value must match
    /// its declared type.
    pub fn validate_arguments(&self, arguments: &Arguments) -> Result<(), String> {
        for key in arguments.keys() {
            if self.parameter(key).is_none() {
                return Err(format!("unknown argument '{}' for tool '{}'", key, self.name));
            }
        }
        for param in &self.parameters {
            match arguments.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(format!(
                        "missing required argument '{}' for tool '{}'",
                        param.name, self.name
                    ));
                }
                Some(value) if !value.is_null() && !param.param_type.accepts(value) => {
                    return Err(format!(
                        "argument '{}' must be of type {}",
                        param.name,
                        param.param_type.as_str()
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// `inputSchema` is carried on the wire as a JSON-Schema object.
mod input_schema {
    use super::{ToolParameter, ToolParameterType};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::{json, Map, Value};

    pub fn serialize<S: Serializer>(params: &[ToolParameter], s: S) -> Result<S::Ok, S::Error> {
        let mut properties = Map::new();
        for param in params {
            let mut prop = json!({ "type": param.param_type.as_str() });
            if let (Some(description), Some(obj)) = (&param.description, prop.as_object_mut()) {
                obj.insert("description".into(), Value::String(description.clone()));
            }
            properties.insert(param.name.clone(), prop);
        }
        let required: Vec<&str> = params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({ "type": "object", "properties": properties, "required": required }).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<ToolParameter>, D::Error> {
        let schema = Value::deserialize(d)?;
        let required: Vec<String> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut params = Vec::new();
        let properties = match schema.get("properties").and_then(Value::as_object) {
            Some(properties) => properties,
            None => return Ok(params),
        };
        let to_param = |name: &str, prop: &Value| -> Result<ToolParameter, D::Error> {
            let type_name = prop.get("type").and_then(Value::as_str).unwrap_or("string");
            let param_type = ToolParameterType::from_schema_name(type_name).ok_or_else(|| {
                serde::de::Error::custom(format!("unsupported parameter type '{}'", type_name))
            })?;
            let mut param = ToolParameter::new(name, param_type);
            param.description = prop
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            param.required = required.iter().any(|r| r == name);
            Ok(param)
        };

        // Required parameters keep their declared order; the rest follow.
        for name in &required {
            if let Some(prop) = properties.get(name) {
                params.push(to_param(name, prop)?);
            }
        }
        for (name, prop) in properties {
            if !required.contains(name) {
                params.push(to_param(name, prop)?);
            }
        }
        Ok(params)
    }
}

/// One typed block of tool output. Only text is produced today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            ContentBlock::Text { text } => text,
        }
    }
}

/// Machine readable failure signature attached to error results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// No tool with that name is registered.
    UnknownTool,
    /// Arguments did not match the tool's schema.
    InvalidArguments,
    /// The tool's capability is not configured on the server.
    NotConfigured,
    /// The upstream service rejected the tool's credential.
    Unauthorized,
    /// The upstream service has nothing for the requested subject.
    NotFound,
    /// Any other upstream failure.
    Upstream,
    Timeout,
    /// The handler failed in an unexpected way (including panics).
    HandlerFailed,
    /// The call never reached the server or its answer never came back.
    Transport,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolErrorKind::UnknownTool => "unknown tool",
            ToolErrorKind::InvalidArguments => "invalid arguments",
            ToolErrorKind::NotConfigured => "not configured",
            ToolErrorKind::Unauthorized => "unauthorized",
            ToolErrorKind::NotFound => "not found",
            ToolErrorKind::Upstream => "upstream error",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::HandlerFailed => "handler failed",
            ToolErrorKind::Transport => "transport failure",
        };
        f.write_str(name)
    }
}

/// Normalized outcome of a tool invocation, success or failure.
///
/// When `is_error` is true the text content is a human readable error description and must not
/// be treated as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(
        rename = "structuredContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(rename = "errorKind", default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolCallResult {
    /// A successful text result.
    pub fn success(tool: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            content: vec![ContentBlock::text(text)],
            structured_content: None,
            is_error: false,
            error_kind: None,
        }
    }

    /// An error result carrying a description and its failure signature.
    pub fn error(tool: impl Into<String>, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            content: vec![ContentBlock::text(message)],
            structured_content: None,
            is_error: true,
            error_kind: Some(kind),
        }
    }

    pub fn with_structured_content(mut self, value: Value) -> Self {
        self.structured_content = Some(value);
        self
    }

    /// Joined text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Structured content of a successful result, as compact JSON.
    pub fn structured_json(&self) -> Option<String> {
        match &self.structured_content {
            Some(structured) if !self.is_error => serde_json::to_string(structured).ok(),
            _ => None,
        }
    }

    /// Prefix the text content with a note, leaving structured content untouched.
    pub fn annotate(mut self, note: &str) -> Self {
        let body = self.text();
        self.content = vec![ContentBlock::text(format!("{}\n{}", note, body))];
        self
    }

    pub(crate) fn into_wire(self) -> Value {
        serde_json::to_value(&self).unwrap_or_else(|e| {
            json!({
                "tool": self.tool,
                "content": [{ "type": "text", "text": format!("unserializable result: {}", e) }],
                "isError": true,
                "errorKind": ToolErrorKind::HandlerFailed,
            })
        })
    }
}

/// Client side view of a tool server.
///
/// Implemented by [`ToolSession`](crate::session::ToolSession) for remote servers and by
/// [`Dispatcher`](crate::dispatcher::Dispatcher) for in-process use.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    /// Advertised tool catalog.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, Box<dyn Error + Send + Sync>>;

    /// Advertised static resources.
    async fn list_resources(
        &self,
    ) -> Result<Vec<ResourceDescriptor>, Box<dyn Error + Send + Sync>> {
        Ok(Vec::new())
    }

    /// Invoke a tool. Tool-level failures come back as `Ok` with `is_error` set; `Err` is
    /// reserved for failures of the protocol itself.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<ToolCallResult, Box<dyn Error + Send + Sync>>;

    async fn read_resource(
        &self,
        uri: &str,
    ) -> Result<Vec<ResourceContents>, Box<dyn Error + Send + Sync>> {
        Err(Box::new(ResourceError::NotFound(uri.to_string())))
    }

    /// Protocol identifier (e.g. "sse-session", "in-process")
    fn protocol_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> ToolDescriptor {
        ToolDescriptor::new("weather", "Current weather")
            .with_parameter(
                ToolParameter::new("units", ToolParameterType::String)
                    .with_description("metric or imperial"),
            )
            .with_parameter(ToolParameter::new("city", ToolParameterType::String).required())
            .with_parameter(ToolParameter::new("days", ToolParameterType::Integer))
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_validate_accepts_matching_arguments() {
        let tool = weather();
        assert!(tool
            .validate_arguments(&args(json!({"city": "Paris", "days": 2})))
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let err = weather()
            .validate_arguments(&args(json!({"city": "Paris", "country": "FR"})))
            .unwrap_err();
        assert!(err.contains("unknown argument 'country'"));
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let err = weather()
            .validate_arguments(&args(json!({"days": 1})))
            .unwrap_err();
        assert!(err.contains("missing required argument 'city'"));
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let err = weather()
            .validate_arguments(&args(json!({"city": "Paris", "days": "two"})))
            .unwrap_err();
        assert!(err.contains("integer"));
    }

    #[test]
    fn test_primary_text_parameter_prefers_required() {
        assert_eq!(weather().primary_text_parameter(), Some("city"));
        let clock = ToolDescriptor::new("time", "Local time");
        assert_eq!(clock.primary_text_parameter(), None);
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let wire = serde_json::to_value(weather()).unwrap();
        assert_eq!(wire["inputSchema"]["type"], "object");
        assert_eq!(wire["inputSchema"]["properties"]["city"]["type"], "string");
        assert_eq!(wire["inputSchema"]["required"], json!(["city"]));

        let back: ToolDescriptor = serde_json::from_value(wire).unwrap();
        assert_eq!(back.parameters[0].name, "city");
        assert!(back.parameters[0].required);
        assert_eq!(back.parameters.len(), 3);
        assert!(back.available);
    }

    #[test]
    fn test_descriptor_without_schema_defaults() {
        let tool: ToolDescriptor = serde_json::from_value(json!({"name": "time"})).unwrap();
        assert!(tool.parameters.is_empty());
        assert!(tool.available);
    }

    #[test]
    fn test_structured_json_only_for_successes() {
        let result = ToolCallResult::success("weather", "Weather in Paris: Clear")
            .with_structured_content(json!({"temperature": 18.5}));
        assert_eq!(result.structured_json().as_deref(), Some(r#"{"temperature":18.5}"#));

        let failed = ToolCallResult::error("weather", ToolErrorKind::NotFound, "City 'X' not found")
            .with_structured_content(json!({"city": "X"}));
        assert!(failed.structured_json().is_none());
        assert_eq!(failed.error_kind, Some(ToolErrorKind::NotFound));
    }

    #[test]
    fn test_annotate_prefixes_text_only() {
        let result = ToolCallResult::success("wikipedia", "Wikipedia summary for Paris:\nParis is a city.")
            .with_structured_content(json!({"title": "Paris"}))
            .annotate("weather unavailable (not configured).");
        assert!(result.text().starts_with("weather unavailable (not configured).\nWikipedia summary"));
        assert_eq!(result.structured_content, Some(json!({"title": "Paris"})));
    }

    #[test]
    fn test_result_wire_field_names() {
        let wire = ToolCallResult::error("weather", ToolErrorKind::Unauthorized, "bad key").into_wire();
        assert_eq!(wire["isError"], true);
        assert_eq!(wire["errorKind"], "unauthorized");
        assert_eq!(wire["content"][0]["type"], "text");
        assert!(wire.get("structuredContent").is_none());
    }
}
