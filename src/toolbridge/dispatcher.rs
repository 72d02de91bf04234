//! Tool Dispatcher
//!
//! Validates incoming invocations against the [`ToolRegistry`] and executes handlers, folding
//! every outcome (success, unknown tool, bad arguments, handler error, panic, timeout) into one
//! [`ToolCallResult`]. `dispatch` never fails at the protocol level.
//!
//! # Architecture
//!
//! ```text
//! tools/call ──► Dispatcher ──► lookup ──► availability ──► schema check
//!                                                  │
//!                          per-dependency permit ◄─┘
//!                                   │
//!                      spawned handler task (timeout, panic capture)
//!                                   │
//!                             ToolCallResult
//! ```
//!
//! The dispatcher also implements [`ToolProtocol`], so an agent can drive it in-process without
//! a network session.

use crate::resource_protocol::{ResourceContents, ResourceDescriptor, ResourceError, ResourceRegistry};
use crate::registry::ToolRegistry;
use crate::tool_protocol::{Arguments, ToolCallResult, ToolDescriptor, ToolErrorKind, ToolProtocol};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default per-call handler timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on a single handler invocation, distinct from any session timeout.
    pub call_timeout: Duration,
    /// Concurrent calls allowed against one external dependency. 1 serializes them.
    pub permits_per_dependency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            permits_per_dependency: 1,
        }
    }
}

/// Routes tool calls to registered handlers.
///
/// Cheap to clone; the registries are shared read-only across all sessions.
#[derive(Clone)]
pub struct Dispatcher {
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
    limits: Arc<HashMap<String, Arc<Semaphore>>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher with default timeouts and dependency limits.
    pub fn new(tools: ToolRegistry, resources: ResourceRegistry) -> Self {
        Self::with_config(tools, resources, DispatcherConfig::default())
    }

    pub fn with_config(
        tools: ToolRegistry,
        resources: ResourceRegistry,
        config: DispatcherConfig,
    ) -> Self {
        let permits = config.permits_per_dependency.max(1);
        let mut limits = HashMap::new();
        for tool in tools.iter() {
            if let Some(dependency) = tool.handler.dependency() {
                limits
                    .entry(dependency.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(permits)));
            }
        }
        Self {
            tools: Arc::new(tools),
            resources: Arc::new(resources),
            limits: Arc::new(limits),
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Advertised tool catalog.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.descriptors()
    }

    pub fn resources(&self) -> Vec<ResourceDescriptor> {
        self.resources.list()
    }

    pub fn read(&self, uri: &str) -> Result<Vec<ResourceContents>, ResourceError> {
        self.resources.read(uri)
    }

    /// Execute `name` with `arguments`. Always returns a result; failures are flagged with
    /// `is_error` and an error kind.
    pub async fn dispatch(&self, name: &str, arguments: Arguments) -> ToolCallResult {
        let tool = match self.tools.get(name) {
            Some(tool) => tool.clone(),
            None => {
                log::warn!("dispatch: unknown tool '{}'", name);
                let known: Vec<String> = self.tools().into_iter().map(|d| d.name).collect();
                return ToolCallResult::error(
                    name,
                    ToolErrorKind::UnknownTool,
                    format!(
                        "Unknown tool '{}'. Available tools: {}",
                        name,
                        known.join(", ")
                    ),
                );
            }
        };

        if !tool.handler.is_available() {
            log::info!("dispatch: tool '{}' is not configured", name);
            return ToolCallResult::error(
                name,
                ToolErrorKind::NotConfigured,
                format!("Tool '{}' is not configured on this server", name),
            );
        }

        if let Err(reason) = tool.descriptor.validate_arguments(&arguments) {
            return ToolCallResult::error(
                name,
                ToolErrorKind::InvalidArguments,
                format!("Invalid arguments: {}", reason),
            );
        }

        let limiter = tool
            .handler
            .dependency()
            .and_then(|dependency| self.limits.get(dependency).cloned());
        let handler = tool.handler.clone();
        let task = tokio::spawn(async move {
            // Held for the whole call; released when the task ends or is aborted.
            let _permit = match limiter {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            handler.call(arguments).await
        });
        let abort = task.abort_handle();

        let started = std::time::Instant::now();
        let result = match tokio::time::timeout(self.config.call_timeout, task).await {
            Err(_) => {
                abort.abort();
                ToolCallResult::error(
                    name,
                    ToolErrorKind::Timeout,
                    format!(
                        "Tool '{}' timed out after {}s",
                        name,
                        self.config.call_timeout.as_secs_f32()
                    ),
                )
            }
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "task cancelled".to_string()
                };
                log::error!("dispatch: tool '{}' crashed: {}", name, reason);
                ToolCallResult::error(
                    name,
                    ToolErrorKind::HandlerFailed,
                    format!("Tool '{}' failed: {}", name, reason),
                )
            }
            Ok(Ok(Err(tool_error))) => ToolCallResult::error(name, tool_error.kind, tool_error.message),
            Ok(Ok(Ok(output))) => {
                let result = ToolCallResult::success(name, output.text);
                match output.structured {
                    Some(structured) => result.with_structured_content(structured),
                    None => result,
                }
            }
        };
        log::debug!(
            "dispatch: '{}' finished in {}ms (error: {})",
            name,
            started.elapsed().as_millis(),
            result.is_error
        );
        result
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[async_trait]
impl ToolProtocol for Dispatcher {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, Box<dyn Error + Send + Sync>> {
        Ok(self.tools())
    }

    async fn list_resources(
        &self,
    ) -> Result<Vec<ResourceDescriptor>, Box<dyn Error + Send + Sync>> {
        Ok(self.resources())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<ToolCallResult, Box<dyn Error + Send + Sync>> {
        Ok(self.dispatch(name, arguments).await)
    }

    async fn read_resource(
        &self,
        uri: &str,
    ) -> Result<Vec<ResourceContents>, Box<dyn Error + Send + Sync>> {
        Ok(self.read(uri)?)
    }

    fn protocol_name(&self) -> &str {
        "in-process"
    }
}
