//! Shared fixtures: a scripted completion client and local stand-ins for the OpenWeather and
//! Wikipedia APIs.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use toolbridge::client_wrapper::{ClientWrapper, Message, Role};
use toolbridge::event::{EventHandler, ServerEvent};

/// Key accepted by the OpenWeather stub.
pub const GOOD_WEATHER_KEY: &str = "good-weather-key";
pub const SECRET: &str = "test-secret";

/// Returns its scripted replies in order; once they run out, every call fails.
pub struct ScriptedClient {
    replies: Vec<String>,
    calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(user) = messages.iter().find(|m| m.role == Role::User) {
            self.prompts.lock().unwrap().push(user.content.clone());
        }
        match self.replies.get(n) {
            Some(reply) => Ok(Message {
                role: Role::Assistant,
                content: reply.clone(),
            }),
            None => Err("no scripted reply left".into()),
        }
    }
}

/// Records the name of every tool call the server receives.
#[derive(Default)]
pub struct CallLog {
    pub tools: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn names(&self) -> Vec<String> {
        self.tools.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for CallLog {
    async fn on_server_event(&self, event: &ServerEvent) {
        if let ServerEvent::ToolCallReceived { tool_name, .. } = event {
            self.tools.lock().unwrap().push(tool_name.clone());
        }
    }
}

async fn weather(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
    if query.get("appid").map(String::as_str) != Some(GOOD_WEATHER_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "cod": 401, "message": "Invalid API key" })),
        );
    }
    let city = query.get("q").cloned().unwrap_or_default();
    if city.eq_ignore_ascii_case("atlantis") {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "cod": "404", "message": "city not found" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "name": city,
            "weather": [{ "description": "clear sky" }],
            "main": { "temp": 18.5, "feels_like": 17.9, "humidity": 40 }
        })),
    )
}

async fn summary(Path(title): Path<String>) -> impl IntoResponse {
    match title.as_str() {
        "Paris" => (
            StatusCode::OK,
            Json(json!({
                "title": "Paris",
                "extract": "Paris is the capital and largest city of France."
            })),
        ),
        _ => (StatusCode::NOT_FOUND, Json(json!({ "title": "Not found." }))),
    }
}

async fn search(Query(query): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
    let q = query.get("q").cloned().unwrap_or_default();
    if q.to_lowercase().contains("lovelace") {
        Json(json!({
            "pages": [{
                "title": "Ada Lovelace",
                "description": "English mathematician (1815-1852)"
            }]
        }))
    } else {
        Json(json!({ "pages": [] }))
    }
}

/// Serve `app` on a free loopback port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// OpenWeather stand-in: 401 for any key but [`GOOD_WEATHER_KEY`], 404 for Atlantis.
pub async fn weather_stub() -> String {
    serve(Router::new().route("/data/2.5/weather", get(weather))).await
}

/// Wikipedia stand-in: a summary for "Paris", a search hit for "lovelace".
pub async fn wikipedia_stub() -> String {
    serve(
        Router::new()
            .route("/api/rest_v1/page/summary/{title}", get(summary))
            .route("/w/rest.php/v1/search/page", get(search)),
    )
    .await
}

/// Poll `check` every 50ms for up to `within`.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
