//! HTTP transport for the gateway
//!
//! Mounts every configured server under `/proxy/{server}`:
//!
//! - `POST /proxy/{server}/mcp` - JSON-RPC messages
//! - `DELETE /proxy/{server}/mcp` - session termination
//! - `GET /proxy/{server}/.well-known/oauth-protected-resource` - discovery
//! - `GET /healthz` - liveness
//!
//! Sessions are identified by the `Mcp-Session-Id` header, issued on
//! `initialize`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcp_gateway::{Dispatcher, ExecutionEngine, MemoryStore, SessionManager};
//! use mcp_gateway::oauth::{JwksAuthenticator, JwksCache};
//! use mcp_gateway::transport::GatewayTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(SessionManager::new()),
//!         ExecutionEngine::new()?,
//!     );
//!     let authenticator = JwksAuthenticator::new(Arc::new(JwksCache::new()));
//!
//!     GatewayTransport::new(dispatcher, authenticator)
//!         .public_url("https://gateway.example.com")
//!         .serve("127.0.0.1:8080", std::future::pending())
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::task::JoinHandle;
use tower::{Layer, ServiceExt};

use crate::dispatcher::{CallContext, Dispatcher};
use crate::error::{Error, ErrorCode, Result};
use crate::jsonrpc::{JsonRpcCall, JsonRpcLayer, JsonRpcService, parse_request};
use crate::oauth::{AuthLayer, ProtectedResourceMetadata, TokenAuthenticator, TokenClaims};
use crate::protocol::SUPPORTED_PROTOCOL_VERSIONS;
use crate::session::SessionError;
use crate::store::{ConfigStore, Server, StoreError, Tenant};
use crate::tracing_layer::{McpTracingLayer, McpTracingService};

/// Header name for MCP session ID
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header name for MCP protocol version
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Liveness probe path
pub const HEALTH_PATH: &str = "/healthz";

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared state for the HTTP handlers
struct AppState {
    service: JsonRpcService<McpTracingService<Dispatcher>>,
    dispatcher: Dispatcher,
}

/// Settings for the header checks applied ahead of authentication
#[derive(Debug, Clone)]
struct HeaderGuard {
    allowed_origins: Vec<String>,
    unprotected: bool,
}

/// HTTP transport serving every configured server
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use mcp_gateway::{Dispatcher, ExecutionEngine, MemoryStore, SessionManager};
/// # use mcp_gateway::oauth::{JwksAuthenticator, JwksCache};
/// # use mcp_gateway::transport::GatewayTransport;
/// # let dispatcher = Dispatcher::new(
/// #     Arc::new(MemoryStore::new()),
/// #     Arc::new(SessionManager::new()),
/// #     ExecutionEngine::new().unwrap(),
/// # );
/// # let authenticator = JwksAuthenticator::new(Arc::new(JwksCache::new()));
/// let transport = GatewayTransport::new(dispatcher, authenticator)
///     .allowed_origins(vec!["https://app.example.com".to_string()])
///     .sweep_interval(Duration::from_secs(60));
/// ```
pub struct GatewayTransport<A: TokenAuthenticator> {
    dispatcher: Dispatcher,
    authenticator: A,
    public_url: Option<String>,
    allowed_origins: Vec<String>,
    unprotected: bool,
    sweep_interval: Option<Duration>,
}

impl<A: TokenAuthenticator> GatewayTransport<A> {
    /// Create a transport serving `dispatcher`, authenticating with `authenticator`
    pub fn new(dispatcher: Dispatcher, authenticator: A) -> Self {
        Self {
            dispatcher,
            authenticator,
            public_url: None,
            allowed_origins: Vec::new(),
            unprotected: false,
            sweep_interval: None,
        }
    }

    /// Base URL used in discovery hints (defaults to `http://<Host header>`)
    pub fn public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Origins browsers may call from. Empty disables the check.
    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Skip authentication, scope and origin checks. Development only.
    pub fn unprotected(mut self, unprotected: bool) -> Self {
        self.unprotected = unprotected;
        self
    }

    /// Periodically remove expired sessions. Off by default.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Build the axum router for this transport
    ///
    /// Starts the session sweeper when one is configured, so this must be
    /// called from within a Tokio runtime. The sweeper then runs until the
    /// runtime shuts down; [`serve`](Self::serve) stops it with the server.
    pub fn into_router(self) -> Router {
        self.build().0
    }

    fn build(self) -> (Router, Option<JoinHandle<()>>) {
        let dispatcher = self.dispatcher.enforce_scopes(!self.unprotected);

        let sweeper = self.sweep_interval.map(|interval| {
            let sessions = dispatcher.sessions().clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    sessions.cleanup_expired().await;
                }
            })
        });

        let mut auth = AuthLayer::new(self.authenticator, dispatcher.store().clone())
            .public_path(HEALTH_PATH)
            .unprotected(self.unprotected);
        if let Some(url) = self.public_url {
            auth = auth.public_url(url);
        }

        let guard = Arc::new(HeaderGuard {
            allowed_origins: self.allowed_origins,
            unprotected: self.unprotected,
        });

        let state = Arc::new(AppState {
            service: JsonRpcLayer::new().layer(McpTracingLayer::new().layer(dispatcher.clone())),
            dispatcher,
        });

        let router = Router::new()
            .route("/proxy/{server}/mcp", post(handle_post).delete(handle_delete))
            .route(
                "/proxy/{server}/.well-known/oauth-protected-resource",
                get(handle_metadata),
            )
            .route(HEALTH_PATH, get(handle_health))
            .with_state(state)
            .layer(auth)
            .layer(middleware::from_fn_with_state(guard, check_headers));
        (router, sweeper)
    }

    /// Serve the transport on the given address until `shutdown` resolves
    pub async fn serve<F>(self, addr: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!("Gateway listening on {}", addr);

        let (router, sweeper) = self.build();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        served.map_err(|e| Error::Transport(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// Reject disallowed origins (403) and unsupported protocol versions (400).
async fn check_headers(
    State(guard): State<Arc<HeaderGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();

    if !guard.unprotected
        && !guard.allowed_origins.is_empty()
        && let Some(origin) = headers.get(header::ORIGIN)
    {
        let origin = origin.to_str().unwrap_or("");
        if !guard.allowed_origins.iter().any(|o| o == origin || o == "*") {
            tracing::debug!(origin = %origin, "Origin not allowed");
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    }

    if let Some(version) = headers
        .get(MCP_PROTOCOL_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        && !SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
    {
        return (
            StatusCode::BAD_REQUEST,
            format!("Unsupported protocol version: {}", version),
        )
            .into_response();
    }

    next.run(request).await
}

/// Extract the session ID from headers
fn get_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Handle POST requests (JSON-RPC messages from client)
async fn handle_post(
    State(state): State<Arc<AppState>>,
    Path(server): Path<String>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Failed to read body: {}", e))
                .into_response();
        }
    };

    let request = match parse_request(&bytes) {
        Ok(request) => request,
        Err(response) => return Json(response).into_response(),
    };

    let context = CallContext {
        server_slug: server,
        session_id: get_session_id(&parts.headers),
        claims: parts.extensions.get::<TokenClaims>().cloned(),
    };

    let outcome = match state
        .service
        .clone()
        .oneshot(JsonRpcCall { context, request })
        .await
    {
        Ok(outcome) => outcome,
        Err(never) => match never {},
    };

    let status = match outcome.error() {
        Some(e) if e.is(ErrorCode::SessionNotFound) => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };

    let Some(response) = outcome.response else {
        return StatusCode::ACCEPTED.into_response();
    };

    let mut resp = (status, Json(response)).into_response();
    if let Some(id) = outcome.session_id
        && let Ok(value) = HeaderValue::from_str(&id)
    {
        resp.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    resp
}

/// Handle DELETE requests (session termination)
async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Path(server): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = get_session_id(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header").into_response();
    };

    let sessions = state.dispatcher.sessions();
    match sessions.get(&session_id).await {
        Ok(session) if session.server_slug != server => {
            (StatusCode::BAD_REQUEST, "Session belongs to another server").into_response()
        }
        Ok(_) => {
            sessions.delete(&session_id).await;
            tracing::info!(session_id = %session_id, server = %server, "Session terminated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(SessionError::Expired | SessionError::NotFound) => {
            (StatusCode::NOT_FOUND, "Session not found").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Serve the Protected Resource Metadata document of a server
async fn handle_metadata(
    State(state): State<Arc<AppState>>,
    Path(server): Path<String>,
) -> Response {
    let store = state.dispatcher.store();
    match metadata_for(store.as_ref(), &server).await {
        Ok(Some(metadata)) => Json(metadata).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Server not found").into_response(),
        Err(e) => {
            tracing::warn!(server = %server, error = %e, "Config store lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn metadata_for(
    store: &dyn ConfigStore,
    slug: &str,
) -> std::result::Result<Option<ProtectedResourceMetadata>, StoreError> {
    let Some(server) = store.server(slug).await?.filter(|s: &Server| s.enabled) else {
        return Ok(None);
    };
    let Some(tenant) = store
        .tenant(&server.tenant_slug)
        .await?
        .filter(|t: &Tenant| t.enabled)
    else {
        return Ok(None);
    };
    let tools = store.tools(slug).await?;
    Ok(Some(ProtectedResourceMetadata::for_server(
        &server, &tenant, &tools,
    )))
}

async fn handle_health() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use crate::engine::ExecutionEngine;
    use crate::oauth::OAuthError;
    use crate::session::SessionManager;
    use crate::store::{MemoryStore, SeedData};
    use serde_json::{Value, json};

    type GatewayRequest = axum::http::Request<Body>;

    /// Accepts "good" (scope read:orders) and "weak" (no scopes)
    #[derive(Clone)]
    struct StaticAuthenticator;

    impl TokenAuthenticator for StaticAuthenticator {
        async fn authenticate(
            &self,
            _issuers: &[String],
            token: &str,
            _audience: &str,
        ) -> std::result::Result<TokenClaims, OAuthError> {
            let scope = match token {
                "good" => "read:orders",
                "weak" => "",
                _ => {
                    return Err(OAuthError::InvalidToken {
                        description: "token could not be validated".to_string(),
                    });
                }
            };
            Ok(serde_json::from_value(json!({ "sub": "user-1", "scope": scope })).unwrap())
        }
    }

    fn transport() -> GatewayTransport<StaticAuthenticator> {
        let seed: SeedData = serde_json::from_value(json!({
            "tenants": [{ "slug": "tenant-a", "allowed_issuers": ["https://idp-a", "https://idp-b"] }],
            "servers": [
                { "slug": "sales", "tenant": "tenant-a", "audience": "aud-sales" },
                { "slug": "products", "tenant": "tenant-a", "audience": "aud-products" }
            ],
            "tools": [
                { "server": "sales", "name": "getOrder", "required_scopes": ["read:orders"],
                  "mapping": { "path": "/api/orders/{{orderId}}" } }
            ]
        }))
        .unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(MemoryStore::from_seed(&seed).unwrap()),
            Arc::new(SessionManager::new()),
            ExecutionEngine::new().unwrap(),
        );
        GatewayTransport::new(dispatcher, StaticAuthenticator)
    }

    fn post(server: &str, token: Option<&str>, session: Option<&str>, body: Value) -> GatewayRequest {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri(format!("/proxy/{}/mcp", server))
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(session) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, session);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn delete(server: &str, session: Option<&str>) -> GatewayRequest {
        let mut builder = axum::http::Request::builder()
            .method("DELETE")
            .uri(format!("/proxy/{}/mcp", server))
            .header("Authorization", "Bearer good");
        if let Some(session) = session {
            builder = builder.header(MCP_SESSION_ID_HEADER, session);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn initialize_body() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test-client", "version": "1.0.0" }
            }
        })
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn open_session(app: &Router, server: &str) -> String {
        let resp = app
            .clone()
            .oneshot(post(server, Some("good"), None, initialize_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        resp.headers()[MCP_SESSION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = transport().into_router();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(HEALTH_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metadata_document() {
        let app = transport().into_router();
        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/proxy/sales/.well-known/oauth-protected-resource")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["resource"], "aud-sales");
        assert_eq!(json["authorization_servers"][1]["issuer"], "https://idp-b");
        assert_eq!(
            json["authorization_servers"][0]["metadata_url"],
            "https://idp-a/.well-known/openid-configuration"
        );
        assert_eq!(json["scopes_supported"], json!(["read:orders"]));
        assert_eq!(json["bearer_methods_supported"], json!(["header"]));

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/proxy/nope/.well-known/oauth-protected-resource")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let app = transport().into_router();
        let resp = app
            .oneshot(post("sales", None, None, initialize_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_initialize_sets_session_header() {
        let app = transport().into_router();
        let resp = app
            .oneshot(post("sales", Some("good"), None, initialize_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(MCP_SESSION_ID_HEADER));

        let json = body_json(resp).await;
        assert_eq!(json["result"]["protocolVersion"], "2025-06-18");
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let app = transport().into_router();
        let resp = app
            .oneshot(post(
                "sales",
                Some("good"),
                None,
                json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let app = transport().into_router();
        let resp = app
            .oneshot(post(
                "sales",
                Some("good"),
                Some("no-such-session"),
                json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], -32006);
    }

    #[tokio::test]
    async fn test_parse_error_body() {
        let app = transport().into_router();
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/proxy/sales/mcp")
            .header("Authorization", "Bearer good")
            .body(Body::from("{oops"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], -32700);
        assert_eq!(json["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_scope_enforced_per_request() {
        let app = transport().into_router();
        let session = open_session(&app, "sales").await;

        let resp = app
            .oneshot(post(
                "sales",
                Some("weak"),
                Some(&session),
                json!({
                    "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                    "params": { "name": "getOrder", "arguments": { "orderId": "1" } }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], -32002);
        assert_eq!(json["error"]["data"]["required"], json!(["read:orders"]));
    }

    #[tokio::test]
    async fn test_delete_session() {
        let app = transport().into_router();
        let session = open_session(&app, "sales").await;

        let resp = app.clone().oneshot(delete("sales", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(delete("products", Some(&session)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(delete("sales", Some(&session)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app.oneshot(delete("sales", Some(&session))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_origin_check() {
        let app = transport()
            .allowed_origins(vec!["https://app.example.com".to_string()])
            .into_router();

        let mut req = post("sales", Some("good"), None, initialize_body());
        req.headers_mut()
            .insert(header::ORIGIN, HeaderValue::from_static("https://evil.example.com"));
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let mut req = post("sales", Some("good"), None, initialize_body());
        req.headers_mut()
            .insert(header::ORIGIN, HeaderValue::from_static("https://app.example.com"));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unsupported_protocol_version_header() {
        let app = transport().into_router();
        let mut req = post("sales", Some("good"), None, initialize_body());
        req.headers_mut()
            .insert(MCP_PROTOCOL_VERSION_HEADER, HeaderValue::from_static("1999-01-01"));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unprotected_mode_skips_auth() {
        let app = transport().unprotected(true).into_router();
        let resp = app
            .oneshot(post("sales", None, None, initialize_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(MCP_SESSION_ID_HEADER));
    }

    #[tokio::test]
    async fn test_serve_stops_sweeper_on_shutdown() {
        let transport = transport().sweep_interval(Duration::from_millis(10));
        let sessions = transport.dispatcher.sessions().clone();

        transport
            .serve("127.0.0.1:0", std::future::ready(()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The sweeper task held the only other handle on the session table
        assert_eq!(Arc::strong_count(&sessions), 1);
    }
}
