//! Tool Agent
//!
//! Drives one query end to end:
//!
//! ```text
//! query ─► open session ─► discover (tools ∥ resources) ─► decide ─► call (+ fallback)
//!                                                                        │
//!                          close session ◄─ answer ◄─ synthesize ◄───────┘
//! ```
//!
//! [`ToolAgent::ask`] never fails. Every failure along the way degrades the reply instead: an
//! unreachable server means no tools, an unparseable decision means no tool, a failed synthesis
//! means raw output.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolbridge::agent::ToolAgent;
//! use toolbridge::clients::openai::OpenAIClient;
//!
//! # async {
//! let client = Arc::new(OpenAIClient::new_with_model_string("sk-...", "gpt-3.5-turbo"));
//! let agent = ToolAgent::new(client, "http://127.0.0.1:8000/sse").with_api_key("supersecretlocalkey");
//! let reply = agent.ask("What's the weather in Paris?").await;
//! println!("{}", reply.answer);
//! # };
//! ```

use crate::client_wrapper::ClientWrapper;
use crate::clients::openai::OpenAIClient;
use crate::config::ClientConfig;
use crate::decision::{Decision, DecisionEngine};
use crate::event::{AgentEvent, EventHandler};
use crate::fallback::{FallbackCoordinator, Substitution};
use crate::resource_protocol::ResourceDescriptor;
use crate::session::{SessionConfig, SessionError, ToolSession};
use crate::synthesizer::AnswerSynthesizer;
use crate::tool_protocol::{ToolCallResult, ToolDescriptor, ToolProtocol};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const CANCELLED_ANSWER: &str = "The request was cancelled.";

/// Everything the agent learned while answering one query.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub query: String,
    pub answer: String,
    pub decision: Decision,
    /// Final tool result, after any fallback.
    pub tool_result: Option<ToolCallResult>,
    pub substitution: Option<Substitution>,
    pub resources: Vec<ResourceDescriptor>,
    pub synthesized: bool,
    pub cancelled: bool,
    /// User-facing remarks about degraded operation.
    pub notes: Vec<String>,
}

impl AgentReply {
    fn cancelled(query: &str) -> Self {
        Self {
            query: query.to_string(),
            answer: CANCELLED_ANSWER.to_string(),
            decision: Decision::none("cancelled"),
            tool_result: None,
            substitution: None,
            resources: Vec::new(),
            synthesized: false,
            cancelled: true,
            notes: Vec::new(),
        }
    }

    /// Name of the tool whose result was used.
    pub fn tool_used(&self) -> Option<&str> {
        self.tool_result.as_ref().map(|r| r.tool.as_str())
    }
}

pub struct ToolAgent {
    decision: DecisionEngine,
    fallback: FallbackCoordinator,
    synthesizer: AnswerSynthesizer,
    sse_url: String,
    session_config: SessionConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ToolAgent {
    /// An agent using `client` for both completion calls and the server at `sse_url`.
    pub fn new(client: Arc<dyn ClientWrapper>, sse_url: impl Into<String>) -> Self {
        Self {
            decision: DecisionEngine::new(client.clone()),
            fallback: FallbackCoordinator::default(),
            synthesizer: AnswerSynthesizer::new(client),
            sse_url: sse_url.into(),
            session_config: SessionConfig::default(),
            event_handler: None,
        }
    }

    /// OpenAI compatible client and server settings from `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        let client = OpenAIClient::new_with_base_url(
            &config.openai_api_key,
            &config.model,
            &config.openai_api_base,
        );
        Self::new(Arc::new(client), config.sse_url()).with_api_key(config.shared_secret.clone())
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.session_config.api_key = Some(key.into());
        self
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackCoordinator) -> Self {
        self.fallback = fallback;
        self
    }

    /// Tool substituted for unknown tool names; `None` turns them into "no tool".
    pub fn with_safe_tool(mut self, tool: Option<String>) -> Self {
        self.decision = self.decision.with_safe_tool(tool);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_agent_event(&event).await;
        }
    }

    /// Answer `query` over a fresh session, closed before returning.
    pub async fn ask(&self, query: &str) -> AgentReply {
        match ToolSession::connect(&self.sse_url, self.session_config.clone()).await {
            Ok(session) => {
                let reply = self.pipeline(Some(&session as &dyn ToolProtocol), query).await;
                session.close().await;
                reply
            }
            Err(e) => {
                log::error!("could not open a session with {}: {}", self.sse_url, e);
                let mut reply = self.pipeline(None, query).await;
                reply.notes.push(match e {
                    SessionError::Unauthorized => {
                        "The tool server rejected the API key, so no tools were used.".to_string()
                    }
                    _ => "The tool server was unreachable, so no tools were used.".to_string(),
                });
                reply
            }
        }
    }

    /// Like [`ask`](Self::ask), but returns promptly once `token` is cancelled. The session is
    /// released when the abandoned work is dropped.
    pub async fn ask_cancellable(&self, query: &str, token: CancellationToken) -> AgentReply {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                log::info!("query cancelled: {}", query);
                AgentReply::cancelled(query)
            }
            reply = self.ask(query) => reply,
        }
    }

    /// Run the pipeline over an existing protocol, e.g. an in-process dispatcher.
    pub async fn run_with(&self, protocol: &dyn ToolProtocol, query: &str) -> AgentReply {
        self.pipeline(Some(protocol), query).await
    }

    async fn pipeline(&self, protocol: Option<&dyn ToolProtocol>, query: &str) -> AgentReply {
        let mut notes = Vec::new();
        let (catalog, resources) = match protocol {
            Some(protocol) => discover(protocol, &mut notes).await,
            None => (Vec::new(), Vec::new()),
        };
        self.emit(AgentEvent::CatalogDiscovered {
            tool_count: catalog.len(),
            resource_count: resources.len(),
        })
        .await;

        let decision = self.decision.decide(query, &catalog).await;
        log::info!(
            "decision: {} ({})",
            decision.tool.as_deref().unwrap_or("no tool"),
            decision.reasoning
        );
        self.emit(AgentEvent::DecisionMade {
            tool: decision.tool.clone(),
            reasoning: decision.reasoning.clone(),
        })
        .await;

        let outcome = match (decision.tool.as_deref(), protocol) {
            (Some(tool), Some(protocol)) => {
                let topic = topic_for(&decision, &catalog, query);
                let outcome = self
                    .fallback
                    .run(protocol, tool, decision.arguments.clone(), &topic, &catalog)
                    .await;
                if let Some(substitution) = &outcome.substitution {
                    self.emit(AgentEvent::FallbackTaken {
                        from: substitution.from.clone(),
                        to: substitution.to.clone(),
                        reason: substitution.reason.clone(),
                    })
                    .await;
                }
                self.emit(AgentEvent::ToolCalled {
                    tool: outcome.result.tool.clone(),
                    is_error: outcome.result.is_error,
                })
                .await;
                Some(outcome)
            }
            _ => None,
        };

        let synthesis = self.synthesizer.synthesize(query, outcome.as_ref()).await;
        self.emit(AgentEvent::AnswerReady {
            synthesized: synthesis.synthesized,
        })
        .await;

        let (tool_result, substitution) = match outcome {
            Some(outcome) => (Some(outcome.result), outcome.substitution),
            None => (None, None),
        };
        AgentReply {
            query: query.to_string(),
            answer: synthesis.answer,
            decision,
            tool_result,
            substitution,
            resources,
            synthesized: synthesis.synthesized,
            cancelled: false,
            notes,
        }
    }
}

/// List tools and resources concurrently. Failures leave the respective list empty.
async fn discover(
    protocol: &dyn ToolProtocol,
    notes: &mut Vec<String>,
) -> (Vec<ToolDescriptor>, Vec<ResourceDescriptor>) {
    let (tools, resources) = tokio::join!(protocol.list_tools(), protocol.list_resources());
    let tools = tools.unwrap_or_else(|e| {
        log::error!("tool discovery over {} failed: {}", protocol.protocol_name(), e);
        notes.push("Tool discovery failed, so no tools were used.".to_string());
        Vec::new()
    });
    let resources = resources.unwrap_or_else(|e| {
        log::warn!("resource discovery failed: {}", e);
        Vec::new()
    });
    log::debug!(
        "discovered {} tools and {} resources",
        tools.len(),
        resources.len()
    );
    (tools, resources)
}

/// The subject handed to a fallback tool: the decided topic, else the primary argument, else the
/// query itself.
fn topic_for(decision: &Decision, catalog: &[ToolDescriptor], query: &str) -> String {
    if let Some(topic) = &decision.topic {
        return topic.clone();
    }
    decision
        .tool
        .as_deref()
        .and_then(|name| catalog.iter().find(|d| d.name == name))
        .and_then(ToolDescriptor::primary_text_parameter)
        .and_then(|param| decision.arguments.get(param))
        .and_then(Value::as_str)
        .unwrap_or(query)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_protocol::{Arguments, ToolParameter, ToolParameterType};
    use serde_json::json;

    fn weather() -> ToolDescriptor {
        ToolDescriptor::new("weather", "w")
            .with_parameter(ToolParameter::new("city", ToolParameterType::String).required())
    }

    #[test]
    fn test_topic_prefers_decided_topic() {
        let decision = Decision {
            reasoning: String::new(),
            tool: Some("weather".into()),
            topic: Some("Paris".into()),
            arguments: Arguments::new(),
        };
        assert_eq!(topic_for(&decision, &[weather()], "q"), "Paris");
    }

    #[test]
    fn test_topic_from_explicit_arguments() {
        let decision = Decision {
            reasoning: String::new(),
            tool: Some("weather".into()),
            topic: None,
            arguments: json!({"city": "Oslo"}).as_object().cloned().unwrap(),
        };
        assert_eq!(topic_for(&decision, &[weather()], "q"), "Oslo");
    }

    #[test]
    fn test_topic_defaults_to_query() {
        let decision = Decision::none("");
        assert_eq!(topic_for(&decision, &[], "the query"), "the query");
    }

    #[test]
    fn test_cancelled_reply() {
        let reply = AgentReply::cancelled("q");
        assert!(reply.cancelled);
        assert_eq!(reply.answer, CANCELLED_ANSWER);
        assert!(reply.tool_used().is_none());
    }
}
