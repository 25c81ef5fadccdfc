//! MCP request tracing middleware.
//!
//! [`McpTracingLayer`] wraps the dispatcher and logs structured information
//! about every MCP call using the [`tracing`] crate.
//!
//! # Logged Information
//!
//! For each request, the layer records:
//! - Request method (e.g., `tools/call`)
//! - Request ID
//! - Addressed server
//! - Tool name for tool calls
//! - Request duration
//! - Response status (success or error code)
//!
//! # Log Levels
//!
//! - configured level (default `INFO`): request completion
//! - `WARN`: error responses

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::Layer;
use tower_service::Service;
use tracing::{Instrument, Level, Span};

use crate::dispatcher::{DispatchRequest, DispatchResponse};
use crate::protocol::McpRequest;

/// Tower layer that adds structured tracing to dispatched MCP requests.
#[derive(Debug, Clone, Copy)]
pub struct McpTracingLayer {
    level: Level,
}

impl Default for McpTracingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl McpTracingLayer {
    /// Create a new tracing layer with default settings (INFO level).
    pub fn new() -> Self {
        Self { level: Level::INFO }
    }

    /// Set the log level for request/response logging.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

impl<S> Layer<S> for McpTracingLayer {
    type Service = McpTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        McpTracingService {
            inner,
            level: self.level,
        }
    }
}

/// Tower service that adds tracing to MCP requests.
///
/// Created by [`McpTracingLayer`].
#[derive(Debug, Clone)]
pub struct McpTracingService<S> {
    inner: S,
    level: Level,
}

impl<S> Service<DispatchRequest> for McpTracingService<S>
where
    S: Service<DispatchRequest, Response = DispatchResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = DispatchResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<DispatchResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: DispatchRequest) -> Self::Future {
        let method = req.inner.method_name().to_string();
        let request_id = match &req.id {
            Some(id) => format!("{:?}", id),
            None => "null".to_string(),
        };
        let span = create_span(
            self.level,
            &method,
            &request_id,
            &req.context.server_slug,
            tool_name(&req.inner),
        );

        let start = Instant::now();
        let fut = self.inner.call(req);
        let level = self.level;

        Box::pin(
            async move {
                let result = fut.await;
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                if let Ok(response) = &result {
                    match &response.inner {
                        Ok(_) => log_success(level, &method, duration_ms),
                        Err(err) => {
                            tracing::warn!(
                                method = %method,
                                error_code = err.code,
                                error_message = %err.message,
                                duration_ms = duration_ms,
                                "MCP request failed"
                            );
                        }
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

fn tool_name(req: &McpRequest) -> Option<&str> {
    match req {
        McpRequest::CallTool(params) => Some(params.name.as_str()),
        _ => None,
    }
}

/// Create a tracing span with the appropriate level.
fn create_span(
    level: Level,
    method: &str,
    request_id: &str,
    server: &str,
    tool: Option<&str>,
) -> Span {
    match level {
        Level::TRACE => tracing::trace_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            server = %server,
            tool = tool,
        ),
        Level::DEBUG => tracing::debug_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            server = %server,
            tool = tool,
        ),
        Level::INFO => tracing::info_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            server = %server,
            tool = tool,
        ),
        Level::WARN => tracing::warn_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            server = %server,
            tool = tool,
        ),
        Level::ERROR => tracing::error_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            server = %server,
            tool = tool,
        ),
    }
}

/// Log successful request completion at the configured level.
fn log_success(level: Level, method: &str, duration_ms: f64) {
    match level {
        Level::TRACE => {
            tracing::trace!(method = %method, duration_ms = duration_ms, "MCP request completed")
        }
        Level::DEBUG => {
            tracing::debug!(method = %method, duration_ms = duration_ms, "MCP request completed")
        }
        Level::INFO => {
            tracing::info!(method = %method, duration_ms = duration_ms, "MCP request completed")
        }
        Level::WARN => {
            tracing::warn!(method = %method, duration_ms = duration_ms, "MCP request completed")
        }
        Level::ERROR => {
            tracing::error!(method = %method, duration_ms = duration_ms, "MCP request completed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::CallContext;
    use crate::error::JsonRpcError;
    use crate::protocol::{CallToolParams, RequestId};
    use serde_json::Value;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct AlwaysFails;

    impl Service<DispatchRequest> for AlwaysFails {
        type Response = DispatchResponse;
        type Error = Infallible;
        type Future = std::future::Ready<Result<DispatchResponse, Infallible>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: DispatchRequest) -> Self::Future {
            std::future::ready(Ok(DispatchResponse {
                id: req.id,
                inner: Err(JsonRpcError::tool_not_found("missing")),
                session_id: None,
            }))
        }
    }

    #[test]
    fn test_layer_creation() {
        let layer = McpTracingLayer::new();
        assert_eq!(layer.level, Level::INFO);

        let layer = McpTracingLayer::new().level(Level::DEBUG);
        assert_eq!(layer.level, Level::DEBUG);
    }

    #[test]
    fn test_tool_name() {
        let req = McpRequest::CallTool(CallToolParams {
            name: "getOrder".to_string(),
            arguments: Value::Null,
        });
        assert_eq!(tool_name(&req), Some("getOrder"));
        assert_eq!(tool_name(&McpRequest::Ping), None);
    }

    #[tokio::test]
    async fn test_passes_response_through() {
        let svc = McpTracingLayer::new().layer(AlwaysFails);
        let resp = svc
            .oneshot(DispatchRequest {
                id: Some(RequestId::Number(9)),
                context: CallContext::new("sales"),
                inner: McpRequest::Ping,
            })
            .await
            .unwrap();
        assert_eq!(resp.id, Some(RequestId::Number(9)));
        assert_eq!(resp.inner.unwrap_err().code, -32001);
    }
}
