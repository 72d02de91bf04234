//! Decision Engine
//!
//! Asks the completion model which tool, if any, answers a query, and turns its free-form reply
//! into a [`Decision`]. Model output is treated as untrusted text:
//!
//! 1. decode the span from the first `{` to the last `}`;
//! 2. failing that, decode the first well-formed object starting at the first `{`;
//! 3. failing that, no tool.
//!
//! A tool the live catalog does not contain is never dispatched; it is swapped for the configured
//! safe tool, or for no tool when the safe tool is not in the catalog either.

use crate::client_wrapper::{ClientWrapper, Message};
use crate::tool_protocol::{Arguments, ToolDescriptor};
use serde_json::Value;
use std::sync::Arc;

pub const DECISION_SYSTEM_PROMPT: &str = "You are a decision agent.";
/// Tool used when the model names something outside the catalog.
pub const DEFAULT_SAFE_TOOL: &str = "wikipedia";

/// Which tool to call, produced fresh for every query.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The model's own explanation. Diagnostic only.
    pub reasoning: String,
    pub tool: Option<String>,
    pub topic: Option<String>,
    /// Arguments for `tool`, already normalized against its schema.
    pub arguments: Arguments,
}

impl Decision {
    pub fn none(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            tool: None,
            topic: None,
            arguments: Arguments::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.tool.is_none()
    }
}

/// Best-effort extraction of one JSON object from model output.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    if let Some(end) = text.rfind('}') {
        if end > start {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Some(value);
            }
        }
    }

    let rest = &text[start..];
    let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    match values.next() {
        Some(Ok(value @ Value::Object(_))) => {
            if rest[values.byte_offset()..].contains('{') {
                log::warn!("model returned several JSON objects, using the first");
            }
            Some(value)
        }
        _ => None,
    }
}

fn describe(tool: &ToolDescriptor) -> String {
    let mut line = format!("{}: {}", tool.name, tool.description);
    if !tool.available {
        line.push_str(" (currently unavailable)");
    }
    if tool.parameters.is_empty() {
        line.push_str(". Parameters: none");
    } else {
        let params: Vec<String> = tool
            .parameters
            .iter()
            .map(|p| {
                let mut s = format!("{} ({}", p.name, p.param_type.as_str());
                if p.required {
                    s.push_str(", required");
                }
                s.push(')');
                if let Some(description) = &p.description {
                    s.push_str(&format!(": {}", description));
                }
                s
            })
            .collect();
        line.push_str(&format!(". Parameters: {}", params.join("; ")));
    }
    line
}

/// Picks a tool for a query with one completion call.
pub struct DecisionEngine {
    client: Arc<dyn ClientWrapper>,
    safe_tool: Option<String>,
}

impl DecisionEngine {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self {
            client,
            safe_tool: Some(DEFAULT_SAFE_TOOL.to_string()),
        }
    }

    /// Replace the safe tool; `None` means "no tool" for anything unknown.
    pub fn with_safe_tool(mut self, tool: Option<String>) -> Self {
        self.safe_tool = tool;
        self
    }

    /// The decision prompt, listing only the live catalog.
    pub fn build_prompt(&self, query: &str, catalog: &[ToolDescriptor]) -> String {
        let tools: Vec<String> = catalog
            .iter()
            .enumerate()
            .map(|(i, tool)| format!("{}. {}", i + 1, describe(tool)))
            .collect();
        format!(
            "You are connected to these tools:\n{}\n\n\
             Decide which tool to use for the user query: \"{}\"\n\
             If no tool is needed, use \"none\".\n\n\
             Respond strictly in this JSON format:\n\
             {{\"reasoning\": \"...\", \"tool\": \"<tool name or none>\", \"topic\": \"...\"}}\n\
             For a tool with several parameters you may send \"arguments\": {{...}} instead of \"topic\".",
            tools.join("\n"),
            query
        )
    }

    /// Ask the model and interpret its reply. Never fails; any problem yields no tool.
    pub async fn decide(&self, query: &str, catalog: &[ToolDescriptor]) -> Decision {
        if catalog.is_empty() {
            return Decision::none("no tools available");
        }
        let messages = [
            Message::system(DECISION_SYSTEM_PROMPT),
            Message::user(self.build_prompt(query, catalog)),
        ];
        match self.client.send_message(&messages).await {
            Ok(reply) => self.interpret(query, &reply.content, catalog),
            Err(e) => {
                log::warn!("decision completion failed: {}", e);
                Decision::none("decision model unavailable")
            }
        }
    }

    /// Turn raw model output into a decision against `catalog`.
    pub fn interpret(&self, query: &str, raw: &str, catalog: &[ToolDescriptor]) -> Decision {
        let object = match extract_json_object(raw) {
            Some(object) => object,
            None => {
                log::warn!("decision output is not JSON: {}", raw);
                return Decision::none("unparseable decision");
            }
        };

        let reasoning = object
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let topic = object
            .get("topic")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let requested = object
            .get("tool")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("none"));

        let requested = match requested {
            Some(name) => name,
            None => {
                return Decision {
                    topic,
                    ..Decision::none(reasoning)
                }
            }
        };

        let (descriptor, substituted) = match catalog.iter().find(|t| t.name == requested) {
            Some(descriptor) => (descriptor, false),
            None => {
                let safe = self
                    .safe_tool
                    .as_deref()
                    .and_then(|safe| catalog.iter().find(|t| t.name == safe));
                match safe {
                    Some(descriptor) => {
                        log::warn!(
                            "model chose unknown tool '{}', using '{}'",
                            requested,
                            descriptor.name
                        );
                        (descriptor, true)
                    }
                    None => {
                        log::warn!("model chose unknown tool '{}', using no tool", requested);
                        return Decision {
                            topic,
                            ..Decision::none(reasoning)
                        };
                    }
                }
            }
        };

        let explicit = match object.get("arguments") {
            Some(Value::Object(arguments)) if !substituted => Some(arguments.clone()),
            _ => None,
        };
        let arguments = match explicit {
            Some(arguments) => arguments,
            None => topic_arguments(descriptor, topic.as_deref().unwrap_or(query)),
        };

        Decision {
            reasoning,
            tool: Some(descriptor.name.clone()),
            topic,
            arguments,
        }
    }
}

/// Map a free-text topic onto the tool's primary string parameter.
pub fn topic_arguments(tool: &ToolDescriptor, topic: &str) -> Arguments {
    let mut arguments = Arguments::new();
    if let Some(param) = tool.primary_text_parameter() {
        arguments.insert(param.to_string(), Value::String(topic.to_string()));
    }
    arguments
}
