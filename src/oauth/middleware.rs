//! Authentication gate for the proxy endpoints.
//!
//! Provides [`AuthLayer`] and [`AuthService`], tower middleware that resolves
//! the addressed server from the request path, validates the bearer token
//! against that server's trusted issuers and audience, and injects the
//! resulting [`TokenClaims`](super::TokenClaims) into request extensions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tower::Layer;

use super::error::OAuthError;
use super::metadata::ProtectedResourceMetadata;
use super::validator::TokenAuthenticator;
use crate::error::{ErrorCode, JsonRpcError};
use crate::protocol::JsonRpcResponse;
use crate::store::{ConfigStore, Server, StoreError, Tenant};

/// Path prefix under which servers are mounted
pub const PROXY_PREFIX: &str = "/proxy";

/// Extract the server slug from `/proxy/{server}/mcp`.
pub fn server_from_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(PROXY_PREFIX)?.strip_prefix('/')?;
    let (slug, tail) = rest.split_once('/')?;
    (!slug.is_empty() && tail.trim_end_matches('/') == "mcp").then_some(slug)
}

/// Metadata URL advertised in `WWW-Authenticate` for a server.
///
/// Uses the configured public URL, or `http://<Host>` when there is none.
pub fn resource_metadata_url(public_url: Option<&str>, headers: &HeaderMap, server: &str) -> String {
    let base = match public_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("localhost");
            format!("http://{}", host)
        }
    };
    format!(
        "{}{}/{}{}",
        base,
        PROXY_PREFIX,
        server,
        ProtectedResourceMetadata::well_known_path()
    )
}

/// Tower layer that wraps services with bearer token authentication.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use mcp_gateway::oauth::{AuthLayer, JwksAuthenticator, JwksCache};
/// use mcp_gateway::store::MemoryStore;
///
/// let authenticator = JwksAuthenticator::new(Arc::new(JwksCache::new()));
/// let layer = AuthLayer::new(authenticator, Arc::new(MemoryStore::new()))
///     .public_url("https://gateway.example.com");
/// ```
#[derive(Clone)]
pub struct AuthLayer<A: TokenAuthenticator> {
    authenticator: A,
    store: Arc<dyn ConfigStore>,
    public_url: Option<String>,
    public_paths: Vec<String>,
    unprotected: bool,
}

impl<A: TokenAuthenticator> AuthLayer<A> {
    /// Create a new layer validating tokens with `authenticator` against servers in `store`.
    pub fn new(authenticator: A, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            authenticator,
            store,
            public_url: None,
            public_paths: Vec::new(),
            unprotected: false,
        }
    }

    /// Base URL used to build discovery hints
    pub fn public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Add a path that does not require authentication.
    ///
    /// Paths containing `/.well-known/` are always public.
    pub fn public_path(mut self, path: impl Into<String>) -> Self {
        self.public_paths.push(path.into());
        self
    }

    /// Let every request through without a token. Development only.
    pub fn unprotected(mut self, unprotected: bool) -> Self {
        self.unprotected = unprotected;
        self
    }
}

impl<S, A: TokenAuthenticator> Layer<S> for AuthLayer<A> {
    type Service = AuthService<S, A>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: self.authenticator.clone(),
            store: self.store.clone(),
            public_url: self.public_url.clone(),
            public_paths: self.public_paths.clone(),
            unprotected: self.unprotected,
        }
    }
}

/// Tower service that authenticates requests to `/proxy/{server}/mcp`.
///
/// Created by [`AuthLayer`]. For each incoming request:
///
/// 1. Public and `/.well-known/` paths, and paths that do not address a
///    server, pass through untouched
/// 2. The addressed server and its tenant must exist and be enabled (401 otherwise)
/// 3. The `Authorization: Bearer <token>` header is extracted
/// 4. The token is validated against the server's candidate issuers and audience
/// 5. On success, [`TokenClaims`](super::TokenClaims) are injected into request extensions
/// 6. On failure, 401 with `WWW-Authenticate` pointing at the server's metadata document
#[derive(Clone)]
pub struct AuthService<S, A: TokenAuthenticator> {
    inner: S,
    authenticator: A,
    store: Arc<dyn ConfigStore>,
    public_url: Option<String>,
    public_paths: Vec<String>,
    unprotected: bool,
}

impl<S, A> tower_service::Service<Request<Body>> for AuthService<S, A>
where
    S: tower_service::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<crate::error::BoxError> + Send,
    A: TokenAuthenticator,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let path = req.uri().path().to_string();
        let public = self.public_paths.iter().any(|p| path.starts_with(p.as_str()))
            || path.contains("/.well-known/");
        let slug = server_from_path(&path).map(String::from);

        let mut inner = self.inner.clone();

        if public || self.unprotected {
            return Box::pin(async move { inner.call(req).await });
        }
        let Some(slug) = slug else {
            return Box::pin(async move { inner.call(req).await });
        };

        let authenticator = self.authenticator.clone();
        let store = self.store.clone();
        let public_url = self.public_url.clone();

        Box::pin(async move {
            let (server, tenant) = match resolve(store.as_ref(), &slug).await {
                Ok(Some(found)) => found,
                Ok(None) => return Ok(oauth_error_response(&OAuthError::UnknownServer, None)),
                Err(response) => return Ok(response),
            };

            let metadata_url = resource_metadata_url(public_url.as_deref(), req.headers(), &slug);

            let Some(token) = bearer_token(req.headers()) else {
                return Ok(oauth_error_response(
                    &OAuthError::MissingToken,
                    Some(&metadata_url),
                ));
            };

            let issuers = server.candidate_issuers(&tenant);
            let claims = match authenticator
                .authenticate(issuers, &token, &server.audience)
                .await
            {
                Ok(claims) => claims,
                Err(error) => {
                    tracing::debug!(server = %slug, error = %error, "Bearer token rejected");
                    return Ok(oauth_error_response(&error, Some(&metadata_url)));
                }
            };

            req.extensions_mut().insert(claims);
            inner.call(req).await
        })
    }
}

/// Enabled server and tenant for `slug`; `Err` carries a ready 500 response.
async fn resolve(
    store: &dyn ConfigStore,
    slug: &str,
) -> Result<Option<(Server, Tenant)>, Response> {
    lookup(store, slug).await.map_err(|e| {
        tracing::warn!(server = %slug, error = %e, "Config store lookup failed");
        let body = JsonRpcResponse::error(None, JsonRpcError::internal_error(e.to_string()));
        (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
    })
}

async fn lookup(store: &dyn ConfigStore, slug: &str) -> Result<Option<(Server, Tenant)>, StoreError> {
    let Some(server) = store.server(slug).await?.filter(|s| s.enabled) else {
        return Ok(None);
    };
    let tenant = store
        .tenant(&server.tenant_slug)
        .await?
        .filter(|t| t.enabled);
    Ok(tenant.map(|t| (server, t)))
}

/// Token from `Authorization: Bearer <token>`; the scheme is case-insensitive.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Build an HTTP error response for an OAuth error.
///
/// Returns the appropriate status code (401 or 403) with the
/// `WWW-Authenticate` header and a JSON-RPC error body.
fn oauth_error_response(error: &OAuthError, resource_metadata_url: Option<&str>) -> Response {
    let status = match error.status_code() {
        403 => StatusCode::FORBIDDEN,
        _ => StatusCode::UNAUTHORIZED,
    };

    let body = JsonRpcResponse::error(
        None,
        JsonRpcError::new(ErrorCode::Unauthorized, error.to_string()),
    );

    let mut response = (status, axum::Json(body)).into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        error
            .www_authenticate(resource_metadata_url)
            .parse()
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer")),
    );
    response
}
