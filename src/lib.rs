//! # toolbridge
//!
//! toolbridge answers natural-language queries by letting a language model pick one external
//! tool, calling that tool on a remote tool server over a persistent SSE session, and folding the
//! result into a final answer.
//!
//! The crate provides:
//!
//! * **Tool server**: [`server::ToolServerBuilder`] (on the default `mcp-server` feature) serves a
//!   [`registry::ToolRegistry`] over SSE + JSON-RPC, with shared-secret authentication, per-call
//!   timeouts, panic containment and per-dependency throttling in the [`dispatcher::Dispatcher`].
//! * **Session client**: [`session::ToolSession`] performs the handshake and correlates any number
//!   of concurrent exchanges by request id.
//! * **Agent pipeline**: [`ToolAgent`] chains the [`decision::DecisionEngine`], the
//!   [`fallback::FallbackCoordinator`] and the [`synthesizer::AnswerSynthesizer`].
//! * **Provider abstraction**: the [`ClientWrapper`] trait, implemented for OpenAI compatible
//!   endpoints (including OpenRouter) by [`clients::openai::OpenAIClient`].
//!
//! ## Serving tools
//!
//! ```rust,no_run
//! use toolbridge::server::ToolServerBuilder;
//! use toolbridge::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     toolbridge::init_logger();
//!     let config = ServerConfig::from_env()?;
//!     let server = ToolServerBuilder::new()
//!         .with_builtin_tools(&config)?
//!         .with_shared_secret(config.shared_secret.clone())
//!         .start_at(config.addr)
//!         .await?;
//!     println!("listening on {}", server.sse_url());
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Asking a question
//!
//! ```rust,no_run
//! use toolbridge::{ClientConfig, ToolAgent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = ToolAgent::from_config(&ClientConfig::from_env()?);
//!     let reply = agent.ask("What's the weather in Paris?").await;
//!     println!("{}", reply.answer);
//!     Ok(())
//! }
//! ```
//!
//! ## Running a pipeline in-process
//!
//! A [`dispatcher::Dispatcher`] implements [`tool_protocol::ToolProtocol`] too, so the agent can
//! drive local handlers without a network session through [`ToolAgent::run_with`].

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// ```rust
/// toolbridge::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

pub mod toolbridge;

// Re-exporting key items for easier external access.
pub use toolbridge::agent;
pub use toolbridge::agent::{AgentReply, ToolAgent};
pub use toolbridge::auth;
pub use toolbridge::client_wrapper;
pub use toolbridge::client_wrapper::{ClientWrapper, Message, Role};
pub use toolbridge::clients;
pub use toolbridge::config;
pub use toolbridge::config::{ClientConfig, ConfigError, ServerConfig};
pub use toolbridge::decision;
pub use toolbridge::dispatcher;
pub use toolbridge::event;
pub use toolbridge::event::{AgentEvent, EventHandler, ServerEvent};
pub use toolbridge::fallback;
pub use toolbridge::jsonrpc;
pub use toolbridge::registry;
pub use toolbridge::resource_protocol;
#[cfg(feature = "mcp-server")]
pub use toolbridge::server;
pub use toolbridge::session;
pub use toolbridge::session::{SessionError, ToolSession};
pub use toolbridge::synthesizer;
pub use toolbridge::tool_protocol;
pub use toolbridge::tools;
