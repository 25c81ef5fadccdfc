//! Protocol dispatcher - routes MCP methods for one addressed server
//!
//! The dispatcher implements Tower's `Service` trait, making it composable
//! with standard tower middleware. Errors never surface as `Service` errors:
//! they are carried in [`DispatchResponse::inner`] and rendered as JSON-RPC
//! error objects.
//!
//! Session lifecycle per session id: `initialize` creates it (ACTIVE),
//! session-bound methods require it, `terminate` removes it (TERMINATED).

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::{Map, Value};
use tower_service::Service;

use crate::engine::ExecutionEngine;
use crate::error::JsonRpcError;
use crate::oauth::{OAuthError, ScopeRequirement, TokenClaims};
use crate::protocol::{
    CallToolParams, CallToolResult, EmptyResult, Implementation, InitializeParams,
    InitializeResult, JsonRpcResponse, ListToolsResult, McpRequest, McpResponse, RequestId,
    ServerCapabilities, TerminateResult, ToolsCapability, negotiate_protocol_version,
};
use crate::session::{Session, SessionError, SessionManager};
use crate::store::{ConfigStore, Server, StoreError, Tenant};

/// Instructions returned by `initialize` when the server has none configured
pub const DEFAULT_INSTRUCTIONS: &str = "Welcome to Gateway MCP Proxy.";

/// Version reported in `serverInfo` when the server has none configured
pub const DEFAULT_SERVER_VERSION: &str = "0.1.0";

/// Per-call context supplied by the transport
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Slug of the server addressed by the request path
    pub server_slug: String,
    /// Value of the `Mcp-Session-Id` header, if any
    pub session_id: Option<String>,
    /// Claims attached by the authentication gate (absent in unprotected mode)
    pub claims: Option<TokenClaims>,
}

impl CallContext {
    pub fn new(server_slug: impl Into<String>) -> Self {
        Self {
            server_slug: server_slug.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_claims(mut self, claims: TokenClaims) -> Self {
        self.claims = Some(claims);
        self
    }
}

/// Request type for the tower Service implementation
#[derive(Debug)]
pub struct DispatchRequest {
    pub id: Option<RequestId>,
    pub context: CallContext,
    pub inner: McpRequest,
}

/// Response type for the tower Service implementation
#[derive(Debug)]
pub struct DispatchResponse {
    pub id: Option<RequestId>,
    pub inner: Result<McpResponse, JsonRpcError>,
    /// Id of the session opened by `initialize`, sent back out of band
    pub session_id: Option<String>,
}

impl DispatchResponse {
    /// Convert to JSON-RPC response
    pub fn into_jsonrpc(self) -> JsonRpcResponse {
        match self.inner {
            Ok(response) => match serde_json::to_value(response) {
                Ok(result) => JsonRpcResponse::result(self.id, result),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize response");
                    JsonRpcResponse::error(
                        self.id,
                        JsonRpcError::internal_error(format!("Serialization error: {}", e)),
                    )
                }
            },
            Err(error) => JsonRpcResponse::error(self.id, error),
        }
    }
}

/// Dispatches MCP methods against the configuration store, the session
/// table and the execution engine.
///
/// Cheap to clone: every component is shared.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn ConfigStore>,
    sessions: Arc<SessionManager>,
    engine: ExecutionEngine,
    enforce_scopes: bool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("enforce_scopes", &self.enforce_scopes)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        sessions: Arc<SessionManager>,
        engine: ExecutionEngine,
    ) -> Self {
        Self {
            store,
            sessions,
            engine,
            enforce_scopes: true,
        }
    }

    /// Check caller claims against tool scopes (on by default; off in unprotected mode)
    pub fn enforce_scopes(mut self, enforce: bool) -> Self {
        self.enforce_scopes = enforce;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Handle an MCP request; returns the response and, for `initialize`,
    /// the new session id.
    async fn handle(
        &self,
        ctx: &CallContext,
        request: McpRequest,
    ) -> Result<(McpResponse, Option<String>), JsonRpcError> {
        match request {
            McpRequest::Initialize(params) => self.initialize(ctx, params).await,
            McpRequest::ListTools => {
                self.session_for(ctx).await?;
                self.resolve_server(&ctx.server_slug).await?;
                let tools = self
                    .store
                    .tools(&ctx.server_slug)
                    .await
                    .map_err(store_error)?
                    .iter()
                    .filter(|t| t.enabled)
                    .map(|t| t.definition())
                    .collect();
                Ok((McpResponse::ListTools(ListToolsResult { tools }), None))
            }
            McpRequest::CallTool(params) => {
                let session = self.session_for(ctx).await?;
                let result = self.call_tool(ctx, &session, params).await?;
                Ok((McpResponse::CallTool(result), None))
            }
            McpRequest::Terminate => {
                let id = ctx
                    .session_id
                    .as_deref()
                    .ok_or_else(JsonRpcError::missing_session)?;
                if let Ok(session) = self.sessions.get(id).await
                    && session.server_slug != ctx.server_slug
                {
                    return Err(JsonRpcError::session_not_found("session not found"));
                }
                self.sessions.delete(id).await;
                tracing::info!(session_id = %id, server = %ctx.server_slug, "Session terminated");
                Ok((
                    McpResponse::Terminate(TerminateResult { terminated: true }),
                    None,
                ))
            }
            McpRequest::Ping => {
                self.session_for(ctx).await?;
                Ok((McpResponse::Pong(EmptyResult {}), None))
            }
            McpRequest::Unknown { method } => Err(JsonRpcError::method_not_found(&method)),
        }
    }

    async fn initialize(
        &self,
        ctx: &CallContext,
        params: InitializeParams,
    ) -> Result<(McpResponse, Option<String>), JsonRpcError> {
        let (server, tenant) = self.resolve_server(&ctx.server_slug).await?;

        if let Some(client) = &params.client_info {
            tracing::info!(
                client = %client.name,
                version = %client.version,
                server = %server.slug,
                "Client initializing"
            );
        }

        let session = self
            .sessions
            .create(&server.slug, &tenant.slug, ctx.claims.clone())
            .await
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;

        let name = if server.name.is_empty() {
            server.slug.clone()
        } else {
            server.name.clone()
        };
        let result = InitializeResult {
            protocol_version: negotiate_protocol_version(params.protocol_version.as_deref())
                .to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
            server_info: Implementation {
                title: Some(server.title.clone().unwrap_or_else(|| name.clone())),
                version: server
                    .version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SERVER_VERSION.to_string()),
                name,
            },
            instructions: Some(
                server
                    .instructions
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            ),
        };

        Ok((McpResponse::Initialize(result), Some(session.id)))
    }

    async fn call_tool(
        &self,
        ctx: &CallContext,
        session: &Session,
        params: CallToolParams,
    ) -> Result<CallToolResult, JsonRpcError> {
        let tool = self
            .store
            .tool(&ctx.server_slug, &params.name)
            .await
            .map_err(store_error)?
            .filter(|t| t.enabled)
            .ok_or_else(|| JsonRpcError::tool_not_found(&params.name))?;

        let arguments = match params.arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => return Err(JsonRpcError::invalid_params("arguments must be an object")),
        };

        if self.enforce_scopes {
            // Claims on this request win over those captured at initialize
            let claims = ctx
                .claims
                .as_ref()
                .or(session.claims.as_ref())
                .ok_or_else(JsonRpcError::unauthorized)?;
            if let Err(OAuthError::InsufficientScope { required, .. }) =
                ScopeRequirement::all(tool.required_scopes.iter().cloned()).check(claims)
            {
                tracing::debug!(tool = %tool.name, required = ?required, "Insufficient scope");
                return Err(JsonRpcError::insufficient_scope(&required));
            }
        }

        let (server, tenant) = self.resolve_server(&ctx.server_slug).await?;
        let upstream = self
            .engine
            .execute(&server, &tenant, &tool, &arguments)
            .await
            .map_err(|e| {
                tracing::warn!(tool = %tool.name, error = %e, "Upstream call failed");
                JsonRpcError::upstream_error(e.to_string())
            })?;

        Ok(CallToolResult::from_upstream(upstream.status, upstream.body))
    }

    /// The live session named by the call, which must belong to the addressed server.
    async fn session_for(&self, ctx: &CallContext) -> Result<Session, JsonRpcError> {
        let id = ctx
            .session_id
            .as_deref()
            .ok_or_else(JsonRpcError::missing_session)?;

        let session = self.sessions.get(id).await.map_err(|e| match e {
            SessionError::Expired => JsonRpcError::session_not_found("session expired"),
            _ => JsonRpcError::session_not_found("session not found"),
        })?;

        if session.server_slug != ctx.server_slug {
            tracing::debug!(
                session_id = %id,
                bound_to = %session.server_slug,
                addressed = %ctx.server_slug,
                "Session used against another server"
            );
            return Err(JsonRpcError::session_not_found("session not found"));
        }
        Ok(session)
    }

    /// Enabled server and its enabled tenant
    async fn resolve_server(&self, slug: &str) -> Result<(Server, Tenant), JsonRpcError> {
        let server = self
            .store
            .server(slug)
            .await
            .map_err(store_error)?
            .filter(|s| s.enabled)
            .ok_or_else(JsonRpcError::server_not_found)?;
        let tenant = self
            .store
            .tenant(&server.tenant_slug)
            .await
            .map_err(store_error)?
            .filter(|t| t.enabled)
            .ok_or_else(JsonRpcError::server_not_found)?;
        Ok((server, tenant))
    }
}

fn store_error(e: StoreError) -> JsonRpcError {
    tracing::error!(error = %e, "Config store failure");
    JsonRpcError::internal_error(e.to_string())
}

// =============================================================================
// Tower Service implementation
// =============================================================================

impl Service<DispatchRequest> for Dispatcher {
    type Response = DispatchResponse;
    type Error = Infallible; // Errors are in the response
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: DispatchRequest) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move {
            let (inner, session_id) = match dispatcher.handle(&req.context, req.inner).await {
                Ok((response, session_id)) => (Ok(response), session_id),
                Err(error) => (Err(error), None),
            };
            Ok(DispatchResponse {
                id: req.id,
                inner,
                session_id,
            })
        })
    }
}
