//! Current weather by city, from the OpenWeather API.

use crate::registry::{ToolError, ToolHandler, ToolOutput};
use crate::tool_protocol::{Arguments, ToolDescriptor, ToolParameter, ToolParameterType};
use crate::tools::{REQUEST_TIMEOUT, USER_AGENT};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
/// Name of the upstream dependency; weather calls are throttled together.
pub const DEPENDENCY: &str = "openweathermap";

#[derive(Deserialize)]
struct CurrentWeather {
    #[serde(default)]
    name: String,
    #[serde(default)]
    weather: Vec<Condition>,
    main: Readings,
}

#[derive(Deserialize)]
struct Condition {
    description: String,
}

#[derive(Deserialize)]
struct Readings {
    temp: f64,
    feels_like: f64,
    humidity: f64,
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct WeatherTool {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl WeatherTool {
    /// Without `api_key` the tool stays registered but reports itself unavailable.
    pub fn new(api_key: Option<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("weather", "Current weather conditions for a city").with_parameter(
            ToolParameter::new("city", ToolParameterType::String)
                .with_description("City name, e.g. Paris")
                .required(),
        )
    }

    async fn current(&self, city: &str, api_key: &str) -> Result<ToolOutput, ToolError> {
        let response = self
            .http
            .get(format!("{}/data/2.5/weather", self.base_url))
            .query(&[("q", city), ("appid", api_key), ("units", "metric")])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            reqwest::StatusCode::UNAUTHORIZED => {
                return Err(ToolError::unauthorized("Invalid OpenWeather API key"))
            }
            reqwest::StatusCode::NOT_FOUND => {
                return Err(ToolError::not_found(format!("City '{}' not found", city)))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(ToolError::upstream(format!(
                    "Weather service error (code {}): {}",
                    status.as_u16(),
                    body.chars().take(200).collect::<String>()
                )));
            }
        }

        let data: CurrentWeather = response
            .json()
            .await
            .map_err(|e| ToolError::upstream(format!("Unexpected weather response: {}", e)))?;
        let name = if data.name.is_empty() {
            capitalize(city)
        } else {
            data.name
        };
        let condition = data
            .weather
            .first()
            .map(|c| capitalize(&c.description))
            .unwrap_or_else(|| "Unknown conditions".to_string());

        let text = format!(
            "Weather in {}: {}, {}°C (feels like {}°C), Humidity: {}%",
            name, condition, data.main.temp, data.main.feels_like, data.main.humidity
        );
        Ok(ToolOutput::text(text).with_structured(json!({
            "city": name,
            "temperature": data.main.temp,
            "feels_like": data.main.feels_like,
            "humidity": data.main.humidity,
            "condition": condition,
        })))
    }
}

#[async_trait]
impl ToolHandler for WeatherTool {
    async fn call(&self, arguments: Arguments) -> Result<ToolOutput, ToolError> {
        let city = arguments
            .get("city")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::invalid_arguments("'city' must be a non-empty string"))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::not_configured("OpenWeather API key not configured"))?;
        self.current(city, api_key).await
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn dependency(&self) -> Option<&str> {
        Some(DEPENDENCY)
    }
}
