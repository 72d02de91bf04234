//! Encyclopedia lookups against the Wikipedia REST API.
//!
//! The page summary endpoint needs an exact title. When it answers 404 the tool runs a one-hit
//! search and reports that page's description instead.

use crate::registry::{ToolError, ToolHandler, ToolOutput};
use crate::tool_protocol::{Arguments, ToolDescriptor, ToolParameter, ToolParameterType};
use crate::tools::{REQUEST_TIMEOUT, USER_AGENT};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const DEFAULT_BASE_URL: &str = "https://en.wikipedia.org";
pub const DEPENDENCY: &str = "wikipedia";

#[derive(Deserialize)]
struct Summary {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extract: String,
}

#[derive(Deserialize)]
struct SearchResults {
    #[serde(default)]
    pages: Vec<SearchPage>,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    title: String,
    description: Option<String>,
}

pub struct WikipediaTool {
    http: reqwest::Client,
    base_url: String,
}

impl WikipediaTool {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("wikipedia", "Encyclopedia summary for a topic").with_parameter(
            ToolParameter::new("topic", ToolParameterType::String)
                .with_description("Subject to look up, e.g. Albert Einstein")
                .required(),
        )
    }

    async fn summary(&self, topic: &str) -> Result<Option<Summary>, ToolError> {
        let title = urlencoding::encode(&topic.replace(' ', "_")).into_owned();
        let response = self
            .http
            .get(format!("{}/api/rest_v1/page/summary/{}", self.base_url, title))
            .send()
            .await?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<Summary>()
                .await
                .map(Some)
                .map_err(|e| ToolError::upstream(format!("Unexpected Wikipedia response: {}", e))),
            status => Err(ToolError::upstream(format!(
                "Wikipedia error (code {})",
                status.as_u16()
            ))),
        }
    }

    async fn search(&self, topic: &str) -> Result<Option<SearchPage>, ToolError> {
        let response = self
            .http
            .get(format!("{}/w/rest.php/v1/search/page", self.base_url))
            .query(&[("q", topic), ("limit", "1")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ToolError::upstream(format!(
                "Wikipedia search error (code {})",
                response.status().as_u16()
            )));
        }
        let results: SearchResults = response
            .json()
            .await
            .map_err(|e| ToolError::upstream(format!("Unexpected Wikipedia response: {}", e)))?;
        Ok(results.pages.into_iter().next())
    }
}

#[async_trait]
impl ToolHandler for WikipediaTool {
    async fn call(&self, arguments: Arguments) -> Result<ToolOutput, ToolError> {
        let topic = arguments
            .get("topic")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ToolError::invalid_arguments("'topic' must be a non-empty string"))?;

        if let Some(summary) = self.summary(topic).await? {
            if summary.extract.trim().is_empty() {
                return Err(ToolError::not_found(format!(
                    "No Wikipedia summary found for '{}'",
                    topic
                )));
            }
            let title = if summary.title.is_empty() {
                topic.to_string()
            } else {
                summary.title
            };
            return Ok(
                ToolOutput::text(format!("Wikipedia summary for {}:\n{}", title, summary.extract))
                    .with_structured(json!({ "title": title, "summary": summary.extract })),
            );
        }

        log::debug!("no exact Wikipedia page for '{}', searching", topic);
        match self.search(topic).await? {
            Some(page) => {
                let description = page
                    .description
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| "No description available".to_string());
                Ok(ToolOutput::text(format!(
                    "Wikipedia result for {}: {}\n{}",
                    topic, page.title, description
                ))
                .with_structured(json!({ "title": page.title, "summary": description })))
            }
            None => Err(ToolError::not_found(format!(
                "Could not find Wikipedia information for '{}'",
                topic
            ))),
        }
    }

    fn dependency(&self) -> Option<&str> {
        Some(DEPENDENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_protocol::ToolErrorKind;

    #[test]
    fn test_descriptor_primary_parameter() {
        assert_eq!(WikipediaTool::descriptor().primary_text_parameter(), Some("topic"));
    }

    #[tokio::test]
    async fn test_missing_topic_is_invalid() {
        let tool = WikipediaTool::new().unwrap();
        let err = tool.call(Arguments::new()).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
    }
}
