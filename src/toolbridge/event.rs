//! Server and agent event system.
//!
//! Provides a callback-based observability layer. Implement [`EventHandler`] to receive
//! notifications about:
//!
//! - **Tool server**: startup, session open/close, rejected exchanges, tool calls
//! - **Agent pipeline**: decisions, tool calls, fallbacks, synthesis
//!
//! Both methods have default no-op implementations, so you only override what you care about.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolbridge::event::{AgentEvent, EventHandler, ServerEvent};
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_agent_event(&self, event: &AgentEvent) {
//!         if let AgentEvent::FallbackTaken { from, to, .. } = event {
//!             println!("{} failed, used {} instead", from, to);
//!         }
//!     }
//!     async fn on_server_event(&self, event: &ServerEvent) {
//!         println!("server: {:?}", event);
//!     }
//! }
//! ```

use async_trait::async_trait;

/// Events emitted by the tool server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The listener is bound and serving.
    ServerStarted { addr: String },
    /// A client opened an event stream.
    SessionOpened { session_id: String },
    /// The event stream was dropped (client disconnect or server shutdown).
    SessionClosed { session_id: String },
    /// An exchange was refused before dispatch.
    RequestRejected {
        session_id: Option<String>,
        reason: String,
    },
    ToolCallReceived {
        session_id: String,
        tool_name: String,
    },
    ToolCallCompleted {
        session_id: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
    },
}

/// Events emitted by a [`ToolAgent`](crate::agent::ToolAgent) while answering one query.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Discovery finished.
    CatalogDiscovered { tool_count: usize, resource_count: usize },
    /// The decision engine settled on a tool, or `None` for no tool.
    DecisionMade {
        tool: Option<String>,
        reasoning: String,
    },
    /// A tool call returned.
    ToolCalled { tool: String, is_error: bool },
    /// The primary tool was replaced by its fallback.
    FallbackTaken {
        from: String,
        to: String,
        reason: String,
    },
    /// The final answer is ready. `synthesized` is false when raw output was returned.
    AnswerReady { synthesized: bool },
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_server_event(&self, _event: &ServerEvent) {}

    async fn on_agent_event(&self, _event: &AgentEvent) {}
}
