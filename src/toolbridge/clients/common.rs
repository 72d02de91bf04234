use crate::client_wrapper::{Message, Role};
use openai_rust::chat;
use openai_rust2 as openai_rust;
use std::error::Error;
use std::time::Duration;

/// Upper bound on one completion call.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(20);

/// Convert our messages into the format expected by openai_rust.
pub fn format_messages(messages: &[Message]) -> Vec<chat::Message> {
    messages
        .iter()
        .map(|msg| chat::Message {
            role: match msg.role {
                Role::System => "system".to_owned(),
                Role::User => "user".to_owned(),
                Role::Assistant => "assistant".to_owned(),
            },
            content: msg.content.clone(),
        })
        .collect()
}

/// Send a chat request and return the assistant's content.
pub async fn send_chat(
    api: &openai_rust::Client,
    model: &str,
    formatted_msgs: Vec<chat::Message>,
    url_path: Option<String>,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let chat_arguments = chat::ChatArguments::new(model, formatted_msgs);

    let response = match tokio::time::timeout(
        COMPLETION_TIMEOUT,
        api.create_chat(chat_arguments, url_path),
    )
    .await
    {
        Ok(response) => response,
        Err(_) => {
            log::error!(
                "completion timed out after {}s",
                COMPLETION_TIMEOUT.as_secs()
            );
            return Err(format!(
                "completion timed out after {}s",
                COMPLETION_TIMEOUT.as_secs()
            )
            .into());
        }
    };

    match response {
        Ok(response) => response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| "completion returned no choices".into()),
        Err(err) => {
            if log::log_enabled!(log::Level::Error) {
                log::error!("send_chat: completion API error: {}", err);
            }
            Err(err.into())
        }
    }
}
