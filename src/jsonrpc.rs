//! JSON-RPC 2.0 service layer
//!
//! Provides a Tower [`Layer`] and [`Service`] for JSON-RPC framing of MCP requests.
//!
//! - [`JsonRpcLayer`] - Tower layer for [`ServiceBuilder`](tower::ServiceBuilder) composition
//! - [`JsonRpcService`] - Tower service wrapping the dispatcher
//!
//! The service handles:
//! - JSON-RPC version and method validation
//! - Notification acknowledgement (no response body)
//! - Parameter decoding into [`McpRequest`]
//! - Error conversion to JSON-RPC error responses

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tower::Layer;
use tower_service::Service;

use crate::dispatcher::{CallContext, DispatchRequest, DispatchResponse};
use crate::error::JsonRpcError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, McpRequest, RequestId};

/// Decode a request body into a JSON-RPC request.
///
/// Malformed JSON yields a parse error and a well-formed document that is
/// not a request yields an invalid-request error. Either way the error
/// response carries the request id when one could be read, `null` otherwise.
pub fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        JsonRpcResponse::error(None, JsonRpcError::parse_error(e.to_string()))
    })?;

    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    if !value.is_object() {
        return Err(JsonRpcResponse::error(
            None,
            JsonRpcError::invalid_request("request must be a JSON object"),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| JsonRpcResponse::error(id, JsonRpcError::invalid_request(e.to_string())))
}

/// A JSON-RPC request together with the transport context it arrived in.
#[derive(Debug)]
pub struct JsonRpcCall {
    pub context: CallContext,
    pub request: JsonRpcRequest,
}

/// What the transport should send back for a [`JsonRpcCall`].
#[derive(Debug)]
pub struct JsonRpcOutcome {
    /// `None` for an acknowledged notification
    pub response: Option<JsonRpcResponse>,
    /// Session opened by this call, if any
    pub session_id: Option<String>,
}

impl JsonRpcOutcome {
    fn reply(response: JsonRpcResponse) -> Self {
        Self {
            response: Some(response),
            session_id: None,
        }
    }

    fn accepted() -> Self {
        Self {
            response: None,
            session_id: None,
        }
    }

    /// The JSON-RPC error carried by the response, if any
    pub fn error(&self) -> Option<&JsonRpcError> {
        self.response.as_ref().and_then(JsonRpcResponse::as_error)
    }
}

/// Tower layer that adds JSON-RPC 2.0 framing to a dispatch service.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tower::ServiceBuilder;
/// use mcp_gateway::{Dispatcher, ExecutionEngine, JsonRpcLayer, MemoryStore, SessionManager};
///
/// let dispatcher = Dispatcher::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(SessionManager::new()),
///     ExecutionEngine::new().unwrap(),
/// );
/// let service = ServiceBuilder::new()
///     .layer(JsonRpcLayer::new())
///     .service(dispatcher);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcLayer {
    _priv: (),
}

impl JsonRpcLayer {
    /// Create a new `JsonRpcLayer`.
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl<S> Layer<S> for JsonRpcLayer {
    type Service = JsonRpcService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JsonRpcService::new(inner)
    }
}

/// Service that handles JSON-RPC framing.
///
/// Wraps a dispatch service and handles JSON-RPC request/response conversion.
#[derive(Debug, Clone)]
pub struct JsonRpcService<S> {
    inner: S,
}

impl<S> JsonRpcService<S> {
    /// Create a new JSON-RPC service wrapping the given inner service
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> Service<JsonRpcCall> for JsonRpcService<S>
where
    S: Service<DispatchRequest, Response = DispatchResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = JsonRpcOutcome;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: JsonRpcCall) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(process_request(inner, call).await) })
    }
}

async fn process_request<S>(mut inner: S, call: JsonRpcCall) -> JsonRpcOutcome
where
    S: Service<DispatchRequest, Response = DispatchResponse, Error = Infallible>,
{
    let JsonRpcCall { context, request } = call;

    if let Err(e) = request.validate() {
        return JsonRpcOutcome::reply(JsonRpcResponse::error(request.id, e));
    }

    if request.is_notification() {
        tracing::debug!(method = %request.method, "Notification acknowledged");
        return JsonRpcOutcome::accepted();
    }

    let mcp_request = match McpRequest::from_jsonrpc(&request) {
        Ok(r) => r,
        Err(e) => {
            return JsonRpcOutcome::reply(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_params(e.to_string()),
            ));
        }
    };

    let response = match inner
        .call(DispatchRequest {
            id: request.id,
            context,
            inner: mcp_request,
        })
        .await
    {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let session_id = response.session_id.clone();
    JsonRpcOutcome {
        response: Some(response.into_jsonrpc()),
        session_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::engine::ExecutionEngine;
    use crate::session::SessionManager;
    use crate::store::{MemoryStore, Server, Tenant};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn service() -> JsonRpcService<Dispatcher> {
        let store = MemoryStore::new();
        store
            .upsert_tenant(Tenant {
                slug: "tenant-a".to_string(),
                name: String::new(),
                enabled: true,
                allowed_issuers: vec![],
                egress_allowlist: vec![],
            })
            .unwrap();
        store
            .upsert_server(
                serde_json::from_value::<Server>(json!({
                    "slug": "sales", "tenant": "tenant-a", "audience": "aud"
                }))
                .unwrap(),
            )
            .unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(store),
            Arc::new(SessionManager::new()),
            ExecutionEngine::new().unwrap(),
        )
        .enforce_scopes(false);
        JsonRpcLayer::new().layer(dispatcher)
    }

    async fn send(service: &JsonRpcService<Dispatcher>, ctx: CallContext, body: Value) -> JsonRpcOutcome {
        let request = parse_request(body.to_string().as_bytes()).unwrap();
        service
            .clone()
            .oneshot(JsonRpcCall {
                context: ctx,
                request,
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_error_has_null_id() {
        let err = parse_request(b"{not json").unwrap_err();
        let json = serde_json::to_value(err).unwrap();
        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["error"]["code"], -32700);
    }

    #[test]
    fn test_parse_missing_method_is_invalid_request() {
        let err = parse_request(br#"{"jsonrpc":"2.0","id":7}"#).unwrap_err();
        let json = serde_json::to_value(err).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["error"]["code"], -32600);

        let err = parse_request(b"[1,2]").unwrap_err();
        let json = serde_json::to_value(err).unwrap();
        assert_eq!(json["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_wrong_version_rejected() {
        let svc = service();
        let outcome = send(
            &svc,
            CallContext::new("sales"),
            json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }),
        )
        .await;
        assert_eq!(outcome.error().unwrap().code, -32600);
    }

    #[tokio::test]
    async fn test_initialize_returns_session() {
        let svc = service();
        let outcome = send(
            &svc,
            CallContext::new("sales"),
            json!({ "jsonrpc": "2.0", "id": "a", "method": "initialize", "params": {} }),
        )
        .await;
        assert!(outcome.error().is_none());
        assert!(outcome.session_id.is_some());

        let json = serde_json::to_value(outcome.response.unwrap()).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["result"]["serverInfo"]["name"], "sales");
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let svc = service();
        let outcome = send(
            &svc,
            CallContext::new("sales"),
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await;
        assert!(outcome.response.is_none());
    }

    #[tokio::test]
    async fn test_bad_params_are_invalid_params() {
        let svc = service();
        let outcome = send(
            &svc,
            CallContext::new("sales").with_session("whatever"),
            json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": { "arguments": {} } }),
        )
        .await;
        assert_eq!(outcome.error().unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let svc = service();
        let outcome = send(
            &svc,
            CallContext::new("sales"),
            json!({ "jsonrpc": "2.0", "id": 4, "method": "prompts/list" }),
        )
        .await;
        assert_eq!(outcome.error().unwrap().code, -32601);
    }
}
