// src/toolbridge/mod.rs

pub mod agent;
pub mod auth;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod decision;
pub mod dispatcher;
pub mod event;
pub mod fallback;
pub mod jsonrpc;
pub mod registry;
pub mod resource_protocol;
#[cfg(feature = "mcp-server")]
pub mod server;
pub mod session;
pub mod synthesizer;
pub mod tool_protocol;
pub mod tools;

// Explicitly export the agent so callers can write toolbridge::ToolAgent
pub use agent::{AgentReply, ToolAgent};
