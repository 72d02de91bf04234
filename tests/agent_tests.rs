//! End-to-end agent scenarios: scripted model, real tool server, stubbed upstream APIs.
#![cfg(feature = "mcp-server")]

mod common;

use common::{
    eventually, weather_stub, wikipedia_stub, CallLog, ScriptedClient, GOOD_WEATHER_KEY, SECRET,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use toolbridge::agent::{ToolAgent, CANCELLED_ANSWER};
use toolbridge::dispatcher::Dispatcher;
use toolbridge::registry::{handler_fn, ToolOutput, ToolRegistry};
use toolbridge::resource_protocol::ResourceRegistry;
use toolbridge::server::{ToolServerBuilder, ToolServerHandle};
use toolbridge::tool_protocol::{ToolDescriptor, ToolErrorKind, ToolParameter, ToolParameterType};
use toolbridge::tools::{ClockTool, WeatherTool, WikipediaTool};

const WEATHER_DECISION: &str =
    r#"{"reasoning": "The user asks about current weather.", "tool": "weather", "topic": "Paris"}"#;

/// weather, wikipedia and time against the local stubs.
async fn start_server(weather_key: Option<&str>, log: Arc<CallLog>) -> ToolServerHandle {
    let weather = WeatherTool::new(weather_key.map(str::to_string))
        .unwrap()
        .with_base_url(weather_stub().await);
    let wikipedia = WikipediaTool::new().unwrap().with_base_url(wikipedia_stub().await);
    ToolServerBuilder::new()
        .with_tool(WeatherTool::descriptor(), Arc::new(weather))
        .unwrap()
        .with_tool(WikipediaTool::descriptor(), Arc::new(wikipedia))
        .unwrap()
        .with_tool(ClockTool::descriptor(), Arc::new(ClockTool))
        .unwrap()
        .with_shared_secret(SECRET)
        .with_keep_alive(Duration::from_millis(100))
        .with_event_handler(log)
        .start_on(0)
        .await
        .unwrap()
}

fn agent(client: Arc<ScriptedClient>, server: &ToolServerHandle) -> ToolAgent {
    ToolAgent::new(client, server.sse_url()).with_api_key(SECRET)
}

#[tokio::test]
async fn test_weather_query_uses_weather_tool() {
    let log = Arc::new(CallLog::default());
    let server = start_server(Some(GOOD_WEATHER_KEY), log.clone()).await;
    let client = ScriptedClient::new(&[WEATHER_DECISION, "It's 18.5°C and clear in Paris."]);

    let reply = agent(client.clone(), &server).ask("What's the weather in Paris?").await;

    assert_eq!(reply.tool_used(), Some("weather"));
    assert!(reply.substitution.is_none());
    assert!(reply.synthesized);
    assert_eq!(reply.answer, "It's 18.5°C and clear in Paris.");
    assert!(reply.notes.is_empty());
    assert_eq!(log.names(), vec!["weather"]);

    let decision_prompt = client.prompt(0);
    assert!(decision_prompt.contains("weather"));
    assert!(decision_prompt.contains("What's the weather in Paris?"));
    let synthesis_prompt = client.prompt(1);
    assert!(synthesis_prompt.contains("Tool status: OK"));
    assert!(synthesis_prompt.contains("Paris"));
    assert!(synthesis_prompt.contains("18.5"));
}

#[tokio::test]
async fn test_missing_weather_key_falls_back_to_wikipedia() {
    let log = Arc::new(CallLog::default());
    let server = start_server(None, log.clone()).await;
    let client = ScriptedClient::new(&[WEATHER_DECISION, "I can't get live weather, but Paris is..."]);

    let reply = agent(client.clone(), &server).ask("What's the weather in Paris?").await;

    assert_eq!(reply.tool_used(), Some("wikipedia"));
    let substitution = reply.substitution.clone().unwrap();
    assert_eq!(substitution.from, "weather");
    assert_eq!(substitution.to, "wikipedia");
    assert_eq!(substitution.reason, "not configured");
    // The unavailable primary is never called.
    assert_eq!(log.names(), vec!["wikipedia"]);

    let text = reply.tool_result.unwrap().text();
    assert!(text.contains("General information about Paris from wikipedia"));
    assert!(text.contains("Paris is the capital and largest city of France."));
    assert!(client.prompt(1).contains("'wikipedia' was used because 'weather' was unavailable"));
}

#[tokio::test]
async fn test_rejected_weather_key_falls_back_after_one_attempt() {
    let log = Arc::new(CallLog::default());
    let server = start_server(Some("expired-key"), log.clone()).await;
    let client = ScriptedClient::new(&[WEATHER_DECISION, "Here is what I found about Paris."]);

    let reply = agent(client, &server).ask("What's the weather in Paris?").await;

    assert_eq!(reply.tool_used(), Some("wikipedia"));
    assert_eq!(reply.substitution.unwrap().reason, "unauthorized");
    assert_eq!(log.names(), vec!["weather", "wikipedia"]);
}

#[tokio::test]
async fn test_unknown_city_falls_back_once_and_keeps_the_error() {
    let log = Arc::new(CallLog::default());
    let server = start_server(Some(GOOD_WEATHER_KEY), log.clone()).await;
    let decision =
        r#"{"reasoning": "weather", "tool": "weather", "topic": "Atlantis"}"#;
    let client = ScriptedClient::new(&[decision, "I could not find Atlantis."]);

    let reply = agent(client.clone(), &server).ask("Weather in Atlantis?").await;

    // Wikipedia has nothing either; its error is final.
    assert_eq!(log.names(), vec!["weather", "wikipedia"]);
    let result = reply.tool_result.unwrap();
    assert!(result.is_error);
    assert_eq!(result.error_kind, Some(ToolErrorKind::NotFound));
    assert!(client.prompt(1).contains("Tool status: ERROR"));
}

#[tokio::test]
async fn test_non_json_decision_means_no_tool() {
    let log = Arc::new(CallLog::default());
    let server = start_server(Some(GOOD_WEATHER_KEY), log.clone()).await;
    let client = ScriptedClient::new(&["I think you should check a weather site.", "Hello!"]);

    let reply = agent(client.clone(), &server).ask("Hi there").await;

    assert!(reply.decision.is_none());
    assert!(reply.tool_result.is_none());
    assert!(log.names().is_empty());
    assert_eq!(reply.answer, "Hello!");
    assert!(client.prompt(1).contains("Tool used: none"));
}

#[tokio::test]
async fn test_unknown_tool_is_never_dispatched() {
    let log = Arc::new(CallLog::default());
    let server = start_server(Some(GOOD_WEATHER_KEY), log.clone()).await;
    let decision = r#"{"reasoning": "stocks", "tool": "stock_price", "topic": "Paris"}"#;
    let client = ScriptedClient::new(&[decision, "Paris is in France."]);

    let reply = agent(client, &server).ask("Tell me about Paris").await;

    assert_eq!(reply.decision.tool.as_deref(), Some("wikipedia"));
    assert_eq!(log.names(), vec!["wikipedia"]);
}

#[tokio::test]
async fn test_unknown_tool_without_safe_tool_means_no_tool() {
    let log = Arc::new(CallLog::default());
    let server = start_server(Some(GOOD_WEATHER_KEY), log.clone()).await;
    let decision = r#"{"reasoning": "stocks", "tool": "stock_price", "topic": "ACME"}"#;
    let client = ScriptedClient::new(&[decision, "I can't look up stocks."]);

    let reply = agent(client, &server)
        .with_safe_tool(None)
        .ask("ACME share price?")
        .await;

    assert!(reply.tool_result.is_none());
    assert!(log.names().is_empty());
}

#[tokio::test]
async fn test_unreachable_server_answers_without_tools() {
    let client = ScriptedClient::new(&["Paris is the capital of France."]);
    let agent = ToolAgent::new(client.clone(), "http://127.0.0.1:9/sse");

    let reply = agent.ask("What's the capital of France?").await;

    // With an empty catalog the decision completion is skipped.
    assert_eq!(client.calls(), 1);
    assert!(reply.tool_result.is_none());
    assert_eq!(reply.answer, "Paris is the capital of France.");
    assert!(reply.notes[0].contains("unreachable"));
}

#[tokio::test]
async fn test_wrong_key_answers_without_tools() {
    let log = Arc::new(CallLog::default());
    let server = start_server(Some(GOOD_WEATHER_KEY), log.clone()).await;
    let client = ScriptedClient::new(&["No tools today."]);
    let agent = ToolAgent::new(client, server.sse_url()).with_api_key("wrong");

    let reply = agent.ask("What's the weather in Paris?").await;

    assert!(reply.tool_result.is_none());
    assert!(reply.notes[0].contains("rejected the API key"));
    assert!(log.names().is_empty());
}

#[tokio::test]
async fn test_failed_synthesis_returns_raw_output() {
    let log = Arc::new(CallLog::default());
    let server = start_server(Some(GOOD_WEATHER_KEY), log).await;
    let client = ScriptedClient::new(&[WEATHER_DECISION]);

    let reply = agent(client, &server).ask("What's the weather in Paris?").await;

    assert!(!reply.synthesized);
    assert!(reply
        .answer
        .starts_with("Weather in Paris: Clear sky, 18.5°C (feels like 17.9°C), Humidity: 40%"));
}

#[tokio::test]
async fn test_failed_synthesis_after_substitution_keeps_the_note() {
    let log = Arc::new(CallLog::default());
    let server = start_server(None, log).await;
    let client = ScriptedClient::new(&[WEATHER_DECISION]);

    let reply = agent(client, &server).ask("What's the weather in Paris?").await;

    assert!(!reply.synthesized);
    assert_eq!(reply.substitution.unwrap().to, "wikipedia");
    assert!(reply
        .answer
        .starts_with("weather unavailable (not configured). General information about Paris from wikipedia:"));
    assert!(reply.answer.contains("Paris is the capital and largest city of France."));
}

#[tokio::test]
async fn test_session_released_after_each_query() {
    let log = Arc::new(CallLog::default());
    let server = start_server(Some(GOOD_WEATHER_KEY), log).await;
    let client = ScriptedClient::new(&[WEATHER_DECISION, "Sunny."]);

    agent(client, &server).ask("What's the weather in Paris?").await;

    assert!(eventually(Duration::from_secs(5), || server.session_count() == 0).await);
}

#[tokio::test]
async fn test_cancelled_query_releases_its_session() {
    let log = Arc::new(CallLog::default());
    let server = ToolServerBuilder::new()
        .with_tool(
            ToolDescriptor::new("slow", "Takes a while")
                .with_parameter(ToolParameter::new("topic", ToolParameterType::String).required()),
            Arc::new(handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ToolOutput::text("finally"))
            })),
        )
        .unwrap()
        .with_call_timeout(Duration::from_secs(60))
        .with_keep_alive(Duration::from_millis(100))
        .with_event_handler(log.clone())
        .start_on(0)
        .await
        .unwrap();
    let decision = r#"{"reasoning": "slow", "tool": "slow", "topic": "anything"}"#;
    let client = ScriptedClient::new(&[decision, "unused"]);
    let agent = ToolAgent::new(client, server.sse_url());

    let token = CancellationToken::new();
    let cancel = token.clone();
    let started = tokio::time::Instant::now();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    });
    let reply = agent.ask_cancellable("be slow", token).await;

    assert!(reply.cancelled);
    assert_eq!(reply.answer, CANCELLED_ANSWER);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(log.names(), vec!["slow"]);
    assert!(eventually(Duration::from_secs(5), || server.session_count() == 0).await);
}

#[tokio::test]
async fn test_in_process_pipeline() {
    let mut tools = ToolRegistry::new();
    tools
        .register(ClockTool::descriptor(), Arc::new(ClockTool))
        .unwrap();
    let dispatcher = Dispatcher::new(tools, ResourceRegistry::new());
    let decision = r#"{"reasoning": "time", "tool": "time", "topic": ""}"#;
    let client = ScriptedClient::new(&[decision, "It is noon."]);
    let agent = ToolAgent::new(client.clone(), "http://unused/sse");

    let reply = agent.run_with(&dispatcher, "What time is it?").await;

    assert_eq!(reply.tool_used(), Some("time"));
    assert!(client.prompt(1).contains("local_time"));
}
