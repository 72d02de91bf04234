//! Serves the built-in weather, wikipedia and time tools over SSE.
//!
//! ```bash
//! export MCP_SERVER_KEY=supersecretlocalkey
//! export OPENWEATHER_API_KEY=...   # optional; without it weather is advertised unavailable
//! RUST_LOG=info cargo run --example tool_server
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use toolbridge::server::ToolServerBuilder;
use toolbridge::{EventHandler, ServerConfig, ServerEvent};

struct LogEvents;

#[async_trait]
impl EventHandler for LogEvents {
    async fn on_server_event(&self, event: &ServerEvent) {
        if let ServerEvent::ToolCallCompleted {
            tool_name,
            is_error,
            duration_ms,
            ..
        } = event
        {
            log::info!("{} finished in {}ms (error: {})", tool_name, duration_ms, is_error);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    toolbridge::init_logger();

    let config = ServerConfig::from_env()?;
    let server = ToolServerBuilder::new()
        .with_builtin_tools(&config)?
        .with_shared_secret(config.shared_secret.clone())
        .with_event_handler(Arc::new(LogEvents))
        .start_at(config.addr)
        .await?;

    println!("Tool server running");
    println!("  SSE endpoint: {}", server.sse_url());
    println!("  Health:       {}/health", server.base_url());
    println!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
