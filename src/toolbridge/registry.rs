//! Tool Handler Registry
//!
//! The server-side source of truth for what tools exist. The registry is an explicit object
//! built once at startup and handed to the [`Dispatcher`](crate::dispatcher::Dispatcher); there
//! is no ambient global lookup.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use toolbridge::registry::{handler_fn, ToolOutput, ToolRegistry};
//! use toolbridge::tool_protocol::{ToolDescriptor, ToolParameter, ToolParameterType};
//!
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register(
//!         ToolDescriptor::new("echo", "Echo the input back").with_parameter(
//!             ToolParameter::new("text", ToolParameterType::String).required(),
//!         ),
//!         Arc::new(handler_fn(|args| async move {
//!             let text = args.get("text").and_then(|v| v.as_str()).unwrap_or_default();
//!             Ok(ToolOutput::text(text))
//!         })),
//!     )
//!     .unwrap();
//! assert!(registry.contains("echo"));
//! ```

use crate::tool_protocol::{Arguments, ToolDescriptor, ToolErrorKind};
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Successful handler output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub structured: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured = Some(value);
        self
    }
}

/// Failure reported by a handler. The kind is forwarded to the client as the error signature.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotConfigured, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Upstream, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::HandlerFailed, message)
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl Error for ToolError {}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ToolError::new(ToolErrorKind::Timeout, format!("request timed out: {}", err))
        } else {
            ToolError::upstream(format!("request failed: {}", err))
        }
    }
}

/// Executable side of a tool.
///
/// Every handler returns a result; panics are contained by the dispatcher but are reported as
/// `handler_failed`, never as data.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Arguments) -> Result<ToolOutput, ToolError>;

    /// False when the capability is not configured (e.g. a missing credential).
    fn is_available(&self) -> bool {
        true
    }

    /// External dependency the handler talks to. Calls sharing a dependency are throttled
    /// together by the dispatcher.
    fn dependency(&self) -> Option<&str> {
        None
    }
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: Arguments) -> Result<ToolOutput, ToolError> {
        (self.f)(arguments).await
    }
}

/// A descriptor bound to its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    /// The descriptor as advertised, with availability taken from the handler.
    pub fn advertised(&self) -> ToolDescriptor {
        let available = self.descriptor.available && self.handler.is_available();
        self.descriptor.clone().with_availability(available)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A tool with this name is already registered.
    Duplicate(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Duplicate(name) => write!(f, "Tool already registered: {}", name),
        }
    }
}

impl Error for RegistryError {}

/// Name → handler map, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if `descriptor.name` is already registered.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.contains(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        log::debug!("registered tool '{}'", descriptor.name);
        self.tools.push(RegisteredTool {
            descriptor,
            handler,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.descriptor.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.tools.iter()
    }

    /// Advertised catalog in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(RegisteredTool::advertised).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unconfigured;

    #[async_trait]
    impl ToolHandler for Unconfigured {
        async fn call(&self, _arguments: Arguments) -> Result<ToolOutput, ToolError> {
            Err(ToolError::not_configured("no key"))
        }

        fn is_available(&self) -> bool {
            false
        }
    }

    fn echo() -> Arc<dyn ToolHandler> {
        Arc::new(handler_fn(|_args| async { Ok(ToolOutput::text("ok")) }))
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor::new("echo", "first"), echo())
            .unwrap();
        let err = registry
            .register(ToolDescriptor::new("echo", "second"), echo())
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("echo".into()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().descriptor.description, "first");
    }

    #[test]
    fn test_descriptors_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["weather", "wikipedia", "time"] {
            registry
                .register(ToolDescriptor::new(name, name), echo())
                .unwrap();
        }
        let names: Vec<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["weather", "wikipedia", "time"]);
    }

    #[test]
    fn test_unavailable_handler_is_advertised_unavailable() {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor::new("weather", "w"), Arc::new(Unconfigured))
            .unwrap();
        assert!(!registry.descriptors()[0].available);
    }

    #[tokio::test]
    async fn test_handler_fn_runs_closure() {
        let handler = handler_fn(|args| async move {
            Ok(ToolOutput::text(format!("{} args", args.len())))
        });
        let mut args = Arguments::new();
        args.insert("a".into(), Value::Bool(true));
        assert_eq!(handler.call(args).await.unwrap().text, "1 args");
    }
}
