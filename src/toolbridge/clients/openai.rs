//! The `OpenAIClient` struct implements `ClientWrapper` for any OpenAI compatible chat
//! completions endpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolbridge::clients::openai::OpenAIClient;
//! use toolbridge::client_wrapper::{ClientWrapper, Message};
//!
//! #[tokio::main]
//! async fn main() {
//!     let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
//!     let client = OpenAIClient::new_with_base_url(&key, "gpt-3.5-turbo", "https://openrouter.ai/api/v1");
//!
//!     match client.send_message(&[Message::user("Hello!")]).await {
//!         Ok(reply) => println!("Assistant: {}", reply.content),
//!         Err(e) => eprintln!("completion failed: {}", e),
//!     }
//! }
//! ```
use std::error::Error;

use async_trait::async_trait;
use openai_rust2 as openai_rust;

use crate::client_wrapper::{ClientWrapper, Message, Role};
use crate::clients::common::{format_messages, send_chat};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Client wrapper for OpenAI style chat completions.
pub struct OpenAIClient {
    client: openai_rust::Client,
    model: String,
    /// Request path, e.g. `/v1/chat/completions` or `/api/v1/chat/completions`.
    url_path: String,
}

impl OpenAIClient {
    /// Client against api.openai.com.
    pub fn new_with_model_string(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, DEFAULT_BASE_URL)
    }

    /// Client against a custom OpenAI compatible base URL such as `https://openrouter.ai/api/v1`.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        let (root, url_path) = split_base_url(base_url);
        OpenAIClient {
            client: openai_rust::Client::new_with_base_url(secret_key, &root),
            model: model_name.to_string(),
            url_path,
        }
    }
}

/// Split `https://host/prefix` into the origin and `/prefix/chat/completions`.
fn split_base_url(base_url: &str) -> (String, String) {
    match url::Url::parse(base_url) {
        Ok(parsed) => {
            let root = parsed[..url::Position::BeforePath].to_string();
            let prefix = parsed.path().trim_end_matches('/');
            (root, format!("{}/chat/completions", prefix))
        }
        Err(e) => {
            log::warn!("invalid completion base URL '{}': {}", base_url, e);
            (base_url.to_string(), "/v1/chat/completions".to_string())
        }
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let content = send_chat(
            &self.client,
            &self.model,
            format_messages(messages),
            Some(self.url_path.clone()),
        )
        .await?;
        Ok(Message {
            role: Role::Assistant,
            content,
        })
    }
}
