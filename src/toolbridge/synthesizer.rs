//! Answer Synthesizer: folds the query and the tool outcome into a final answer with a second
//! completion call.

use crate::client_wrapper::{ClientWrapper, Message};
use crate::fallback::ToolOutcome;
use std::sync::Arc;

pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a helpful assistant combining tool output.";
pub const APOLOGY: &str =
    "Sorry, I could not produce an answer right now. Please try again later.";
const UNSYNTHESIZED_NOTE: &str = "(Note: the answer could not be composed, showing the raw tool output.)";

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    /// False when the answer is raw tool output or the apology.
    pub synthesized: bool,
}

pub struct AnswerSynthesizer {
    client: Arc<dyn ClientWrapper>,
}

impl AnswerSynthesizer {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self { client }
    }

    pub fn build_prompt(&self, query: &str, outcome: Option<&ToolOutcome>) -> String {
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                return format!(
                    "User question: {}\nTool used: none\n\nAnswer the question directly.",
                    query
                )
            }
        };

        let result = &outcome.result;
        let mut prompt = format!("User question: {}\nTool used: {}\n", query, result.tool);
        if let Some(substitution) = &outcome.substitution {
            prompt.push_str(&format!(
                "Substitution: '{}' was used because '{}' was unavailable ({})\n",
                substitution.to, substitution.from, substitution.reason
            ));
        }
        if result.is_error {
            prompt.push_str(&format!("Tool status: ERROR\nTool error: {}\n\n", result.text()));
            prompt.push_str(
                "The tool failed. The error text above is not data: do not present it as facts. \
                 Tell the user what could not be retrieved and answer as well as you can without it.",
            );
        } else {
            prompt.push_str(&format!("Tool status: OK\nTool result: {}\n", result.text()));
            if let Some(data) = result.structured_json() {
                prompt.push_str(&format!("Structured data: {}\n", data));
            }
            prompt.push_str("\nNow give a helpful final answer based on the tool result.");
        }
        prompt
    }

    /// Compose the answer. Falls back to the raw output, then to an apology.
    pub async fn synthesize(&self, query: &str, outcome: Option<&ToolOutcome>) -> Synthesis {
        let messages = [
            Message::system(SYNTHESIS_SYSTEM_PROMPT),
            Message::user(self.build_prompt(query, outcome)),
        ];
        match self.client.send_message(&messages).await {
            Ok(reply) if !reply.content.trim().is_empty() => Synthesis {
                answer: reply.content,
                synthesized: true,
            },
            Ok(_) => {
                log::warn!("synthesis returned an empty answer");
                raw(outcome)
            }
            Err(e) => {
                log::warn!("synthesis failed: {}", e);
                raw(outcome)
            }
        }
    }
}

fn raw(outcome: Option<&ToolOutcome>) -> Synthesis {
    // The text blocks carry any substitution note.
    let output = outcome.map(|o| o.result.text()).unwrap_or_default();
    let answer = if output.trim().is_empty() {
        APOLOGY.to_string()
    } else {
        format!("{}\n\n{}", output, UNSYNTHESIZED_NOTE)
    };
    Synthesis {
        answer,
        synthesized: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::Role;
    use crate::fallback::Substitution;
    use crate::tool_protocol::{ToolCallResult, ToolErrorKind};
    use async_trait::async_trait;
    use std::error::Error;
    use std::sync::Mutex;

    struct Recording {
        reply: Result<&'static str, &'static str>,
        prompts: Mutex<Vec<String>>,
    }

    impl Recording {
        fn new(reply: Result<&'static str, &'static str>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ClientWrapper for Recording {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn send_message(
            &self,
            messages: &[Message],
        ) -> Result<Message, Box<dyn Error + Send + Sync>> {
            assert_eq!(messages[0].content, SYNTHESIS_SYSTEM_PROMPT);
            self.prompts.lock().unwrap().push(messages[1].content.clone());
            match self.reply {
                Ok(text) => Ok(Message {
                    role: Role::Assistant,
                    content: text.to_string(),
                }),
                Err(e) => Err(e.into()),
            }
        }
    }

    fn outcome(result: ToolCallResult) -> ToolOutcome {
        ToolOutcome {
            result,
            substitution: None,
            calls: 1,
        }
    }

    #[tokio::test]
    async fn test_ok_result_is_labelled() {
        let client = Recording::new(Ok("It is sunny in Paris."));
        let synthesizer = AnswerSynthesizer::new(client.clone());
        let outcome = outcome(ToolCallResult::success("weather", "Weather in Paris: Clear sky, 18°C"));
        let synthesis = synthesizer.synthesize("Weather in Paris?", Some(&outcome)).await;
        assert!(synthesis.synthesized);
        assert_eq!(synthesis.answer, "It is sunny in Paris.");
        let prompt = &client.prompts.lock().unwrap()[0];
        assert!(prompt.contains("Tool used: weather"));
        assert!(prompt.contains("Tool status: OK"));
    }

    #[tokio::test]
    async fn test_error_result_is_never_unlabelled() {
        let client = Recording::new(Ok("Sorry, the city was not found."));
        let synthesizer = AnswerSynthesizer::new(client.clone());
        let outcome = outcome(ToolCallResult::error(
            "weather",
            ToolErrorKind::NotFound,
            "City 'Atlantis' not found",
        ));
        synthesizer.synthesize("Weather in Atlantis?", Some(&outcome)).await;
        let prompt = &client.prompts.lock().unwrap()[0];
        assert!(prompt.contains("Tool status: ERROR"));
        assert!(prompt.contains("not data"));
    }

    #[test]
    fn test_substitution_is_mentioned() {
        let synthesizer = AnswerSynthesizer::new(Recording::new(Ok("")));
        let mut outcome = outcome(ToolCallResult::success("wikipedia", "Paris is a city."));
        outcome.substitution = Some(Substitution {
            from: "weather".into(),
            to: "wikipedia".into(),
            reason: "not configured".into(),
        });
        let prompt = synthesizer.build_prompt("Weather in Paris?", Some(&outcome));
        assert!(prompt.contains("'wikipedia' was used because 'weather' was unavailable (not configured)"));
    }

    #[test]
    fn test_no_tool_prompt() {
        let synthesizer = AnswerSynthesizer::new(Recording::new(Ok("")));
        let prompt = synthesizer.build_prompt("Hello!", None);
        assert!(prompt.contains("Tool used: none"));
        assert!(!prompt.contains("Tool status"));
    }

    #[tokio::test]
    async fn test_failed_synthesis_returns_raw_output() {
        let synthesizer = AnswerSynthesizer::new(Recording::new(Err("rate limited")));
        let outcome = outcome(ToolCallResult::success("time", "Local system time: 2024-01-01 12:00:00"));
        let synthesis = synthesizer.synthesize("What time is it?", Some(&outcome)).await;
        assert!(!synthesis.synthesized);
        assert!(synthesis.answer.starts_with("Local system time: 2024-01-01 12:00:00"));
        assert!(synthesis.answer.contains("could not be composed"));
        assert!(!synthesis.answer.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_failed_synthesis_keeps_substitution_note() {
        let synthesizer = AnswerSynthesizer::new(Recording::new(Err("down")));
        let mut outcome = outcome(
            ToolCallResult::success("wikipedia", "Wikipedia summary for Paris:\nParis is a city.")
                .with_structured_content(serde_json::json!({"title": "Paris"}))
                .annotate("weather unavailable (not configured). General information about Paris from wikipedia:"),
        );
        outcome.substitution = Some(Substitution {
            from: "weather".into(),
            to: "wikipedia".into(),
            reason: "not configured".into(),
        });
        let synthesis = synthesizer.synthesize("Weather in Paris?", Some(&outcome)).await;
        assert!(!synthesis.synthesized);
        assert!(synthesis.answer.starts_with("weather unavailable (not configured)."));
        assert!(synthesis.answer.contains("Paris is a city."));
        assert!(!synthesis.answer.contains("\"title\""));
    }

    #[tokio::test]
    async fn test_failed_synthesis_without_output_apologizes() {
        let synthesizer = AnswerSynthesizer::new(Recording::new(Err("down")));
        let synthesis = synthesizer.synthesize("Hello?", None).await;
        assert_eq!(synthesis.answer, APOLOGY);
        assert!(!synthesis.synthesized);
    }
}
