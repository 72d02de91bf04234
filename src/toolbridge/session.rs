//! Client side of the SSE session protocol.
//!
//! A [`ToolSession`] holds one event stream open against a tool server, learns the POST endpoint
//! from the stream's first `endpoint` event, performs the `initialize` handshake and then
//! correlates every JSON-RPC response arriving on the stream with the request that caused it.
//! Any number of exchanges may be in flight at once; responses may arrive in any order.
//!
//! ```text
//! Disconnected → Connecting → Initialized → Active → Closing → Closed
//!                    │              │           │
//!                    └──────────────┴───────────┴──► Closed (handshake failure, stream loss,
//!                                                    protocol violation)
//! ```
//!
//! Dropping a session aborts its reader task, which closes the stream; the server releases the
//! session when it notices.

use crate::jsonrpc::{
    CallToolParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListResourcesResult,
    ListToolsResult, ReadResourceParams, ReadResourceResult, METHOD_CALL_TOOL, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_LIST_RESOURCES, METHOD_LIST_TOOLS, METHOD_READ_RESOURCE,
    PROTOCOL_VERSION,
};
use crate::resource_protocol::{ResourceContents, ResourceDescriptor};
use crate::tool_protocol::{Arguments, ToolCallResult, ToolDescriptor, ToolProtocol};
use async_trait::async_trait;
use eventsource_client::{Client, ReconnectOptions, SSE};
use futures_util::TryStreamExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio_util::task::AbortOnDropHandle;
use url::Url;

/// Bound on waiting for the `endpoint` event.
pub const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on the whole `initialize` handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on a single exchange. Longer than the server's own handler timeout.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Initialized,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The stream could not be opened or a POST could not be delivered.
    Connect(String),
    /// No `endpoint` event arrived in time.
    EndpointTimeout,
    HandshakeTimeout,
    /// One exchange went unanswered. The session itself stays usable.
    ExchangeTimeout,
    /// The server refused the shared secret.
    Unauthorized,
    /// The server refused the POST with another status.
    Rejected(u16),
    /// The server sent something that is not a JSON-RPC message.
    Protocol(String),
    /// The server answered with a JSON-RPC error.
    Rpc { code: i32, message: String },
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connect(msg) => write!(f, "connection failed: {}", msg),
            SessionError::EndpointTimeout => {
                write!(f, "no endpoint event within {}s", ENDPOINT_TIMEOUT.as_secs())
            }
            SessionError::HandshakeTimeout => write!(f, "handshake timed out"),
            SessionError::ExchangeTimeout => write!(f, "no response before the exchange timeout"),
            SessionError::Unauthorized => write!(f, "unauthorized: server rejected the API key"),
            SessionError::Rejected(status) => write!(f, "server rejected the request ({})", status),
            SessionError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            SessionError::Rpc { code, message } => write!(f, "rpc error {}: {}", code, message),
            SessionError::Closed => write!(f, "session closed"),
        }
    }
}

impl Error for SessionError {}

impl From<eventsource_client::Error> for SessionError {
    fn from(err: eventsource_client::Error) -> Self {
        SessionError::Connect(err.to_string())
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        SessionError::Connect(format!("invalid URL: {}", err))
    }
}

/// Connection options for a [`ToolSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sent as `X-API-KEY` on every request.
    pub api_key: Option<String>,
    pub endpoint_timeout: Duration,
    pub handshake_timeout: Duration,
    pub exchange_timeout: Duration,
    pub client_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint_timeout: ENDPOINT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            exchange_timeout: EXCHANGE_TIMEOUT,
            client_name: "toolbridge-agent".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }
}

type ResponseSlot = oneshot::Sender<Result<JsonRpcResponse, SessionError>>;

/// In-flight exchanges keyed by request id.
#[derive(Default)]
struct PendingRequests {
    requests: Mutex<HashMap<u64, ResponseSlot>>,
}

impl PendingRequests {
    fn insert(&self, id: u64, slot: ResponseSlot) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.insert(id, slot);
        }
    }

    fn respond(&self, id: u64, response: Result<JsonRpcResponse, SessionError>) -> bool {
        let slot = self.requests.lock().ok().and_then(|mut r| r.remove(&id));
        match slot {
            Some(slot) => {
                let _ = slot.send(response);
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: u64) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.remove(&id);
        }
    }

    /// Fail every waiting exchange with `error`.
    fn broadcast_close(&self, error: SessionError) {
        let drained: Vec<ResponseSlot> = match self.requests.lock() {
            Ok(mut requests) => requests.drain().map(|(_, slot)| slot).collect(),
            Err(_) => Vec::new(),
        };
        for slot in drained {
            let _ = slot.send(Err(error.clone()));
        }
    }

    fn len(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

/// Frees an exchange's slot however the exchange ends, including when its future is dropped.
struct PendingSlot<'a> {
    pending: &'a PendingRequests,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// A live session with a tool server.
pub struct ToolSession {
    post_url: Url,
    http: reqwest::Client,
    config: SessionConfig,
    pending: Arc<PendingRequests>,
    state: Arc<RwLock<SessionState>>,
    next_id: AtomicU64,
    reader: AbortOnDropHandle<()>,
    server: Option<InitializeResult>,
}

impl ToolSession {
    /// Open the stream at `sse_url` and complete the handshake.
    pub async fn connect(sse_url: &str, config: SessionConfig) -> Result<Self, SessionError> {
        let state = Arc::new(RwLock::new(SessionState::Connecting));
        let pending = Arc::new(PendingRequests::default());
        let base = Url::parse(sse_url)?;

        let mut builder = eventsource_client::ClientBuilder::for_url(sse_url)?
            .reconnect(ReconnectOptions::reconnect(false).build());
        if let Some(key) = &config.api_key {
            builder = builder.header("X-API-KEY", key)?;
        }
        let client = builder.build();

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        // Aborted on drop, so a cancelled connect releases the stream too.
        let reader = AbortOnDropHandle::new(tokio::spawn(read_stream(
            client,
            endpoint_tx,
            pending.clone(),
            state.clone(),
        )));

        let endpoint = match tokio::time::timeout(config.endpoint_timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                *state.write().await = SessionState::Closed;
                return Err(SessionError::Connect(
                    "stream closed before the endpoint event".to_string(),
                ));
            }
            Err(_) => {
                reader.abort();
                *state.write().await = SessionState::Closed;
                return Err(SessionError::EndpointTimeout);
            }
        };
        let post_url = base.join(&endpoint)?;
        log::debug!("session endpoint: {}", post_url);

        let mut session = Self {
            post_url,
            http: reqwest::Client::new(),
            config,
            pending,
            state,
            next_id: AtomicU64::new(1),
            reader,
            server: None,
        };

        let handshake = tokio::time::timeout(session.config.handshake_timeout, session.initialize());
        match handshake.await {
            Ok(Ok(init)) => {
                log::info!(
                    "connected to {} {} (protocol {})",
                    init.server_info.name,
                    init.server_info.version,
                    init.protocol_version
                );
                session.server = Some(init);
            }
            Ok(Err(e)) => {
                session.shutdown(SessionError::Closed).await;
                return Err(e);
            }
            Err(_) => {
                session.shutdown(SessionError::Closed).await;
                return Err(SessionError::HandshakeTimeout);
            }
        }
        Ok(session)
    }

    async fn initialize(&self) -> Result<InitializeResult, SessionError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": self.config.client_name, "version": env!("CARGO_PKG_VERSION") },
        });
        let init: InitializeResult = self.request(METHOD_INITIALIZE, Some(params)).await?;
        self.set_state(SessionState::Initialized).await;
        self.notify(METHOD_INITIALIZED).await?;
        self.set_state(SessionState::Active).await;
        Ok(init)
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Handshake result, including server identity and capabilities.
    pub fn server(&self) -> Option<&InitializeResult> {
        self.server.as_ref()
    }

    /// Number of exchanges awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Close the stream and fail anything still in flight.
    pub async fn close(mut self) {
        self.shutdown(SessionError::Closed).await;
    }

    async fn shutdown(&mut self, error: SessionError) {
        self.set_state(SessionState::Closing).await;
        self.reader.abort();
        self.pending.broadcast_close(error);
        self.set_state(SessionState::Closed).await;
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        // Closed is terminal.
        if *state != SessionState::Closed {
            *state = next;
        }
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<(), SessionError> {
        let mut request = self.http.post(self.post_url.clone()).json(message);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-KEY", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::UNAUTHORIZED => Err(SessionError::Unauthorized),
            status => Err(SessionError::Rejected(status.as_u16())),
        }
    }

    async fn notify(&self, method: &str) -> Result<(), SessionError> {
        self.post(&JsonRpcRequest::notification(method)).await
    }

    /// One request/response exchange, decoded as `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, SessionError> {
        let value = self.exchange(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| SessionError::Protocol(format!("unexpected {} result: {}", method, e)))
    }

    async fn exchange(&self, method: &str, params: Option<Value>) -> Result<Value, SessionError> {
        if matches!(
            self.state().await,
            SessionState::Closing | SessionState::Closed
        ) {
            return Err(SessionError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };

        self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let response = match tokio::time::timeout(self.config.exchange_timeout, rx).await {
            Ok(Ok(response)) => response?,
            Ok(Err(_)) => return Err(SessionError::Closed),
            Err(_) => {
                log::warn!("{} (id {}) timed out", method, id);
                return Err(SessionError::ExchangeTimeout);
            }
        };

        match response.error {
            Some(error) => Err(SessionError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }
}

/// Reader task: forwards the endpoint, then routes responses until the stream ends.
async fn read_stream(
    client: impl Client,
    endpoint_tx: oneshot::Sender<String>,
    pending: Arc<PendingRequests>,
    state: Arc<RwLock<SessionState>>,
) {
    let mut stream = client.stream();
    let mut endpoint_tx = Some(endpoint_tx);

    let reason = loop {
        match stream.try_next().await {
            Ok(Some(SSE::Event(event))) if event.event_type == "endpoint" => {
                match endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(event.data);
                    }
                    None => log::warn!("ignoring repeated endpoint event"),
                }
            }
            Ok(Some(SSE::Event(event))) if event.event_type == "message" => {
                match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                    Ok(response) => match response.id {
                        Some(id) => {
                            if !pending.respond(id, Ok(response)) {
                                log::warn!("response for unknown request id {}", id);
                            }
                        }
                        None => log::warn!("ignoring message without id"),
                    },
                    Err(e) => {
                        break SessionError::Protocol(format!("malformed message: {}", e));
                    }
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break SessionError::Closed,
            Err(e) => {
                log::warn!("event stream error: {}", e);
                break SessionError::Closed;
            }
        }
    };

    log::info!("event stream ended: {}", reason);
    *state.write().await = SessionState::Closed;
    pending.broadcast_close(reason);
}

#[async_trait]
impl ToolProtocol for ToolSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, Box<dyn Error + Send + Sync>> {
        let result: ListToolsResult = self.request(METHOD_LIST_TOOLS, None).await?;
        Ok(result.tools)
    }

    async fn list_resources(
        &self,
    ) -> Result<Vec<ResourceDescriptor>, Box<dyn Error + Send + Sync>> {
        if !self.server.as_ref().is_some_and(|s| s.supports("resources")) {
            return Ok(Vec::new());
        }
        let result: ListResourcesResult = self.request(METHOD_LIST_RESOURCES, None).await?;
        Ok(result.resources)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<ToolCallResult, Box<dyn Error + Send + Sync>> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let mut result: ToolCallResult = self.request(METHOD_CALL_TOOL, Some(params)).await?;
        if result.tool.is_empty() {
            result.tool = name.to_string();
        }
        Ok(result)
    }

    async fn read_resource(
        &self,
        uri: &str,
    ) -> Result<Vec<ResourceContents>, Box<dyn Error + Send + Sync>> {
        let params = serde_json::to_value(ReadResourceParams {
            uri: uri.to_string(),
        })?;
        let result: ReadResourceResult = self.request(METHOD_READ_RESOURCE, Some(params)).await?;
        Ok(result.contents)
    }

    fn protocol_name(&self) -> &str {
        "sse-session"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: u64) -> JsonRpcResponse {
        JsonRpcResponse::success(Some(id), json!({ "n": id }))
    }

    #[tokio::test]
    async fn test_pending_routes_by_id_in_any_order() {
        let pending = PendingRequests::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.insert(1, tx1);
        pending.insert(2, tx2);

        assert!(pending.respond(2, Ok(response(2))));
        assert!(pending.respond(1, Ok(response(1))));
        assert_eq!(rx1.await.unwrap().unwrap().result.unwrap()["n"], 1);
        assert_eq!(rx2.await.unwrap().unwrap().result.unwrap()["n"], 2);
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_delivered() {
        let pending = PendingRequests::default();
        assert!(!pending.respond(42, Ok(response(42))));
    }

    #[tokio::test]
    async fn test_broadcast_close_fails_everything() {
        let pending = PendingRequests::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.insert(1, tx1);
        pending.insert(2, tx2);

        pending.broadcast_close(SessionError::Protocol("garbage".into()));
        assert!(matches!(rx1.await.unwrap(), Err(SessionError::Protocol(_))));
        assert!(matches!(rx2.await.unwrap(), Err(SessionError::Protocol(_))));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        let config = SessionConfig {
            endpoint_timeout: Duration::from_millis(500),
            ..SessionConfig::default()
        };
        // Port 9 (discard) is not listening on loopback in test environments.
        let result = ToolSession::connect("http://127.0.0.1:9/sse", config).await;
        assert!(matches!(
            result,
            Err(SessionError::Connect(_)) | Err(SessionError::EndpointTimeout)
        ));
    }

    #[test]
    fn test_error_display() {
        assert!(SessionError::Unauthorized.to_string().contains("unauthorized"));
        assert_eq!(
            SessionError::Rpc {
                code: -32601,
                message: "Method not found".into()
            }
            .to_string(),
            "rpc error -32601: Method not found"
        );
    }
}
