//! Configuration for the tool server and the agent.
//!
//! Both structs are plain data; build them by hand or read them from the environment with
//! `from_env()`. No config-file parsing dependencies are involved.
//!
//! # Example
//!
//! ```rust
//! use toolbridge::ServerConfig;
//!
//! let mut config = ServerConfig::default();
//! config.openweather_api_key = Some("my-key".into());
//! assert_eq!(config.addr.port(), 8000);
//! ```

use crate::clients::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::dispatcher::DEFAULT_CALL_TIMEOUT;
use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_SHARED_SECRET: &str = "supersecretlocalkey";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A required variable is not set.
    Missing(&'static str),
    /// A variable is set but cannot be parsed.
    Invalid { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{} is not set", var),
            ConfigError::Invalid { var, value } => write!(f, "{} has invalid value '{}'", var, value),
        }
    }
}

impl Error for ConfigError {}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn shared_secret(lookup: &impl Fn(&str) -> Option<String>) -> String {
    match non_empty(lookup("MCP_SERVER_KEY")) {
        Some(secret) => secret,
        None => {
            log::warn!("MCP_SERVER_KEY not set, using the default shared secret");
            DEFAULT_SHARED_SECRET.to_string()
        }
    }
}

/// Settings for the tool server binary.
#[derive(Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Expected `X-API-KEY` value.
    pub shared_secret: String,
    /// Without it the weather tool is advertised as unavailable.
    pub openweather_api_key: Option<String>,
    pub call_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            shared_secret: DEFAULT_SHARED_SECRET.to_string(),
            openweather_api_key: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Read `MCP_SERVER_ADDR`, `MCP_SERVER_KEY` and `OPENWEATHER_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(addr) = non_empty(lookup("MCP_SERVER_ADDR")) {
            config.addr = addr.parse().map_err(|_| ConfigError::Invalid {
                var: "MCP_SERVER_ADDR",
                value: addr.clone(),
            })?;
        }
        config.shared_secret = shared_secret(&lookup);
        config.openweather_api_key = non_empty(lookup("OPENWEATHER_API_KEY"));
        if config.openweather_api_key.is_none() {
            log::warn!("OPENWEATHER_API_KEY not set, the weather tool will be unavailable");
        }
        Ok(config)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("openweather_api_key", &self.openweather_api_key.as_ref().map(|_| "***"))
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

/// Settings for the agent side.
#[derive(Clone)]
pub struct ClientConfig {
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub model: String,
    /// Tool server base URL; `/sse` is appended when missing.
    pub server_url: String,
    pub shared_secret: String,
}

impl ClientConfig {
    /// Read `OPENAI_API_KEY` (required), `OPENAI_API_BASE`, `OPENAI_MODEL`, `MCP_SERVER_URL`
    /// and `MCP_SERVER_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let openai_api_key =
            non_empty(lookup("OPENAI_API_KEY")).ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        Ok(Self {
            openai_api_key,
            openai_api_base: non_empty(lookup("OPENAI_API_BASE"))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: non_empty(lookup("OPENAI_MODEL")).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            server_url: non_empty(lookup("MCP_SERVER_URL"))
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            shared_secret: shared_secret(&lookup),
        })
    }

    /// The event stream URL of the tool server.
    pub fn sse_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        if base.ends_with("/sse") {
            base.to_string()
        } else {
            format!("{}/sse", base)
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("openai_api_base", &self.openai_api_base)
            .field("model", &self.model)
            .field("server_url", &self.server_url)
            .finish_non_exhaustive()
    }
}
