//! A ClientWrapper is a wrapper around a chat completion service.
//! The agent treats it as a black box: prompt in, text out, may fail.
//! It keeps no conversation state; every call carries its full message list.

use async_trait::async_trait;
use std::error::Error;

/// Represents the possible roles for a message.
#[derive(Clone, Debug, PartialEq)]
pub enum Role {
    // steers the model's behaviour for the whole call
    System,
    // the query or prompt
    User,
    Assistant,
}

/// Represents a generic message to be sent to an LLM.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Trait defining the interface to a completion service.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Model identifier sent with each request.
    fn model_name(&self) -> &str;

    /// Send `messages` and return the assistant's reply.
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;
}
