//! Ask the tool agent one question.
//!
//! ```bash
//! export OPENAI_API_KEY=...
//! export OPENAI_API_BASE=https://openrouter.ai/api/v1   # optional
//! export MCP_SERVER_URL=http://127.0.0.1:8000           # optional
//! cargo run --example ask_agent -- "What's the weather in Paris?"
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use toolbridge::{AgentEvent, ClientConfig, EventHandler, ToolAgent};
use tokio_util::sync::CancellationToken;

struct Trace;

#[async_trait]
impl EventHandler for Trace {
    async fn on_agent_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::DecisionMade { tool, reasoning } => {
                println!("Decision: {} ({})", tool.as_deref().unwrap_or("no tool"), reasoning)
            }
            AgentEvent::FallbackTaken { from, to, reason } => {
                println!("Fallback: {} -> {} ({})", from, to, reason)
            }
            AgentEvent::ToolCalled { tool, is_error } => {
                println!("Tool used: {}{}", tool, if *is_error { " (failed)" } else { "" })
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    toolbridge::init_logger();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let query = if query.trim().is_empty() {
        "What's the weather in Paris?".to_string()
    } else {
        query
    };

    let config = ClientConfig::from_env()?;
    let agent = ToolAgent::from_config(&config).with_event_handler(Arc::new(Trace));

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    println!("Question: {}", query);
    let reply = agent.ask_cancellable(&query, token).await;
    println!("\n{}", reply.answer);
    for note in &reply.notes {
        println!("note: {}", note);
    }
    Ok(())
}
