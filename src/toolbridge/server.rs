//! Tool server over SSE.
//!
//! Exposes a [`Dispatcher`] through the session protocol:
//!
//! ```text
//! GET  /sse                         event stream; first event is `endpoint`
//! POST /messages?session_id=<id>    JSON-RPC request, answered 202 then delivered on the stream
//! GET  /health                      liveness
//! GET  /                            server info
//! ```
//!
//! Each POST is authenticated with the shared secret before anything else happens; a mismatch is
//! answered `401` and never reaches the dispatcher. Requests are handled on their own tasks, so a
//! slow tool never holds up other exchanges on the same stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolbridge::server::ToolServerBuilder;
//! use toolbridge::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig::from_env()?;
//!     let server = ToolServerBuilder::new()
//!         .with_builtin_tools(&config)?
//!         .with_shared_secret(config.shared_secret.clone())
//!         .start_at(config.addr)
//!         .await?;
//!     println!("SSE endpoint: {}", server.sse_url());
//!     Ok(())
//! }
//! ```

use crate::auth::{AuthConfig, API_KEY_HEADER};
use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::event::{EventHandler, ServerEvent};
use crate::jsonrpc::{
    CallToolParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListResourcesResult, ListToolsResult, ReadResourceParams, ReadResourceResult, ServerInfo,
    INTERNAL_ERROR, METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_LIST_RESOURCES, METHOD_LIST_TOOLS,
    METHOD_READ_RESOURCE, PROTOCOL_VERSION, RESOURCE_NOT_FOUND,
};
use crate::registry::{RegistryError, ToolHandler, ToolRegistry};
use crate::resource_protocol::{ResourceDescriptor, ResourceError, ResourceRegistry};
use crate::tool_protocol::ToolDescriptor;
use crate::tools;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

const SESSION_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Live event streams, keyed by session id.
#[derive(Default)]
pub(crate) struct SessionHub {
    sessions: Mutex<HashMap<String, mpsc::Sender<Event>>>,
}

impl SessionHub {
    /// Register a new stream and queue its `endpoint` event.
    fn open(self: &Arc<Self>) -> (String, mpsc::Receiver<Event>) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let endpoint = Event::default()
            .event("endpoint")
            .data(format!("/messages?session_id={}", session_id));
        // The channel is empty, so this cannot fail for lack of capacity.
        let _ = tx.try_send(endpoint);
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session_id.clone(), tx);
        }
        (session_id, rx)
    }

    fn sender(&self, session_id: &str) -> Option<mpsc::Sender<Event>> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(session_id).cloned())
    }

    fn remove(&self, session_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(session_id);
        }
    }

    /// Drop every sender so that all open streams end.
    fn close_all(&self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.clear();
        }
    }

    fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Unregisters a session when its stream is dropped, whichever side went away.
struct SessionGuard {
    session_id: String,
    hub: Arc<SessionHub>,
    events: Option<Arc<dyn EventHandler>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.hub.remove(&self.session_id);
        log::info!("session {} closed", self.session_id);
        if let (Some(handler), Ok(runtime)) =
            (self.events.clone(), tokio::runtime::Handle::try_current())
        {
            let event = ServerEvent::SessionClosed {
                session_id: self.session_id.clone(),
            };
            runtime.spawn(async move { handler.on_server_event(&event).await });
        }
    }
}

struct SessionStream {
    events: ReceiverStream<Event>,
    _guard: SessionGuard,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx).map(|e| e.map(Ok))
    }
}

struct ServerState {
    dispatcher: Dispatcher,
    auth: AuthConfig,
    hub: Arc<SessionHub>,
    keep_alive: Duration,
    events: Option<Arc<dyn EventHandler>>,
    info: ServerInfo,
}

impl ServerState {
    async fn emit(&self, event: ServerEvent) {
        if let Some(handler) = &self.events {
            handler.on_server_event(&event).await;
        }
    }
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn root(State(state): State<Arc<ServerState>>) -> Json<Value> {
    Json(json!({
        "message": format!("{} is running.", state.info.name),
        "version": state.info.version,
        "sse": "/sse",
        "health": "/health",
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "time": chrono::Utc::now().to_rfc3339() }))
}

async fn open_stream(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let (session_id, rx) = state.hub.open();
    log::info!("session {} opened", session_id);
    state
        .emit(ServerEvent::SessionOpened {
            session_id: session_id.clone(),
        })
        .await;
    let stream = SessionStream {
        events: ReceiverStream::new(rx),
        _guard: SessionGuard {
            session_id,
            hub: state.hub.clone(),
            events: state.events.clone(),
        },
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive))
}

async fn post_message(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if !state.auth.validate(provided) {
        log::warn!("rejected exchange for session {}: bad API key", query.session_id);
        state
            .emit(ServerEvent::RequestRejected {
                session_id: Some(query.session_id.clone()),
                reason: "unauthorized".to_string(),
            })
            .await;
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response();
    }

    let sender = match state.hub.sender(&query.session_id) {
        Some(sender) => sender,
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown session: {}", query.session_id) })),
            )
                .into_response()
        }
    };

    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid JSON-RPC message: {}", e) })),
            )
                .into_response()
        }
    };

    if request.id.is_none() {
        log::debug!("session {}: notification {}", query.session_id, request.method);
        return StatusCode::ACCEPTED.into_response();
    }

    let session_id = query.session_id;
    tokio::spawn(async move {
        let response = handle_request(&state, &session_id, request).await;
        match serde_json::to_string(&response) {
            Ok(data) => {
                if sender
                    .send(Event::default().event("message").data(data))
                    .await
                    .is_err()
                {
                    log::debug!("session {} went away before its response", session_id);
                }
            }
            Err(e) => log::error!("failed to encode response: {}", e),
        }
    });
    StatusCode::ACCEPTED.into_response()
}

fn respond<T: Serialize>(id: Option<u64>, value: &T) -> JsonRpcResponse {
    match serde_json::to_value(value) {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(e) => JsonRpcResponse::failure(id, JsonRpcError::new(INTERNAL_ERROR, e.to_string())),
    }
}

fn params<T: serde::de::DeserializeOwned>(request: &JsonRpcRequest) -> Result<T, JsonRpcError> {
    serde_json::from_value(request.params.clone().unwrap_or(Value::Null))
        .map_err(JsonRpcError::invalid_params)
}

async fn handle_request(
    state: &ServerState,
    session_id: &str,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id;
    log::debug!("session {}: {} (id {:?})", session_id, request.method, id);
    match request.method.as_str() {
        METHOD_INITIALIZE => respond(
            id,
            &InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: json!({ "tools": {}, "resources": {} }),
                server_info: state.info.clone(),
            },
        ),
        METHOD_LIST_TOOLS => respond(
            id,
            &ListToolsResult {
                tools: state.dispatcher.tools(),
            },
        ),
        METHOD_LIST_RESOURCES => respond(
            id,
            &ListResourcesResult {
                resources: state.dispatcher.resources(),
            },
        ),
        METHOD_CALL_TOOL => {
            let call: CallToolParams = match params(&request) {
                Ok(call) => call,
                Err(e) => return JsonRpcResponse::failure(id, e),
            };
            state
                .emit(ServerEvent::ToolCallReceived {
                    session_id: session_id.to_string(),
                    tool_name: call.name.clone(),
                })
                .await;
            let started = std::time::Instant::now();
            let result = state.dispatcher.dispatch(&call.name, call.arguments).await;
            state
                .emit(ServerEvent::ToolCallCompleted {
                    session_id: session_id.to_string(),
                    tool_name: call.name,
                    is_error: result.is_error,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
                .await;
            JsonRpcResponse::success(id, result.into_wire())
        }
        METHOD_READ_RESOURCE => {
            let read: ReadResourceParams = match params(&request) {
                Ok(read) => read,
                Err(e) => return JsonRpcResponse::failure(id, e),
            };
            match state.dispatcher.read(&read.uri) {
                Ok(contents) => respond(id, &ReadResourceResult { contents }),
                Err(e) => {
                    JsonRpcResponse::failure(id, JsonRpcError::new(RESOURCE_NOT_FOUND, e.to_string()))
                }
            }
        }
        other => JsonRpcResponse::failure(id, JsonRpcError::method_not_found(other)),
    }
}

/// Fluent builder for a tool server.
pub struct ToolServerBuilder {
    tools: ToolRegistry,
    resources: ResourceRegistry,
    dispatcher_config: DispatcherConfig,
    auth: AuthConfig,
    keep_alive: Duration,
    event_handler: Option<Arc<dyn EventHandler>>,
    info: ServerInfo,
}

impl ToolServerBuilder {
    /// A server with no tools, no authentication and default timeouts.
    pub fn new() -> Self {
        Self {
            tools: ToolRegistry::new(),
            resources: ResourceRegistry::new(),
            dispatcher_config: DispatcherConfig::default(),
            auth: AuthConfig::None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            event_handler: None,
            info: ServerInfo {
                name: "toolbridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Register a tool. Fails on a duplicate name.
    pub fn with_tool(
        mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<Self, RegistryError> {
        self.tools.register(descriptor, handler)?;
        Ok(self)
    }

    pub fn with_resource(
        mut self,
        descriptor: ResourceDescriptor,
        text: impl Into<String>,
    ) -> Result<Self, ResourceError> {
        self.resources.register(descriptor, text)?;
        Ok(self)
    }

    /// Register the weather, wikipedia and time tools plus the informational resources.
    ///
    /// The weather tool is registered even without a credential; it is then advertised as
    /// unavailable.
    pub fn with_builtin_tools(
        mut self,
        config: &ServerConfig,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let weather = tools::WeatherTool::new(config.openweather_api_key.clone())?;
        let wikipedia = tools::WikipediaTool::new()?;
        self.tools
            .register(tools::WeatherTool::descriptor(), Arc::new(weather))?;
        self.tools
            .register(tools::WikipediaTool::descriptor(), Arc::new(wikipedia))?;
        self.tools
            .register(tools::ClockTool::descriptor(), Arc::new(tools::ClockTool))?;
        for (descriptor, text) in tools::builtin_resources() {
            self.resources.register(descriptor, text)?;
        }
        self.dispatcher_config.call_timeout = config.call_timeout;
        Ok(self)
    }

    /// Require `X-API-KEY: <secret>` on every exchange.
    pub fn with_shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth = AuthConfig::shared_secret(secret);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher_config.call_timeout = timeout;
        self
    }

    pub fn with_dependency_permits(mut self, permits: usize) -> Self {
        self.dispatcher_config.permits_per_dependency = permits;
        self
    }

    /// Interval of SSE keep-alive comments; also bounds how long a vanished client lingers.
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn with_server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = ServerInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    fn into_state(self) -> Arc<ServerState> {
        Arc::new(ServerState {
            dispatcher: Dispatcher::with_config(self.tools, self.resources, self.dispatcher_config),
            auth: self.auth,
            hub: Arc::new(SessionHub::default()),
            keep_alive: self.keep_alive,
            events: self.event_handler,
            info: self.info,
        })
    }

    fn router_for(state: Arc<ServerState>) -> Router {
        Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .route("/sse", get(open_stream))
            .route("/messages", post(post_message))
            .with_state(state)
    }

    /// The axum router without binding a listener.
    pub fn into_router(self) -> Router {
        Self::router_for(self.into_state())
    }

    /// Start the server on 127.0.0.1:`port`.
    pub async fn start_on(self, port: u16) -> Result<ToolServerHandle, Box<dyn Error + Send + Sync>> {
        self.start_at(SocketAddr::from(([127, 0, 0, 1], port))).await
    }

    /// Bind `addr` and serve in the background. Port 0 picks a free port.
    pub async fn start_at(
        self,
        addr: SocketAddr,
    ) -> Result<ToolServerHandle, Box<dyn Error + Send + Sync>> {
        if !self.auth.is_required() {
            log::warn!("tool server starting without authentication");
        }
        let state = self.into_state();
        let hub = state.hub.clone();
        let events = state.events.clone();
        let app = Self::router_for(state);

        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        log::info!("tool server listening on {}", addr);
        if let Some(handler) = events {
            handler
                .on_server_event(&ServerEvent::ServerStarted {
                    addr: addr.to_string(),
                })
                .await;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                log::error!("tool server stopped: {}", e);
            }
        });

        Ok(ToolServerHandle {
            addr,
            hub,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

impl Default for ToolServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running tool server. Dropping the handle shuts the server down.
pub struct ToolServerHandle {
    addr: SocketAddr,
    hub: Arc<SessionHub>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ToolServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn sse_url(&self) -> String {
        format!("{}/sse", self.base_url())
    }

    /// Number of currently open event streams.
    pub fn session_count(&self) -> usize {
        self.hub.len()
    }

    /// Stop accepting connections, end every open stream and wait for the server task.
    pub async fn shutdown(mut self) {
        self.signal_shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn signal_shutdown(&mut self) {
        self.hub.close_all();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ToolServerHandle {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}
