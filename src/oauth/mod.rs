//! OAuth 2.1 resource server support for the gateway.
//!
//! The gateway acts as a **resource server** for every configured MCP
//! server: it validates tokens issued by the authorization servers a tenant
//! trusts and serves Protected Resource Metadata for discovery.
//!
//! # Architecture
//!
//! - **Key-Set Cache** ([`JwksCache`]): JWK sets fetched from
//!   `<issuer>/.well-known/jwks.json`, refreshed on an interval and on
//!   unknown key ids, with last-known-good fallback.
//!
//! - **Token Validation** ([`TokenAuthenticator`]): tries each candidate
//!   issuer in order. [`JwksAuthenticator`] verifies JWTs with keys from the
//!   cache.
//!
//! - **Scope Requirements** ([`ScopeRequirement`]): per-tool required scopes.
//!
//! - **HTTP Middleware** ([`AuthLayer`]/[`AuthService`]): Tower middleware that
//!   resolves the addressed server, extracts and validates the bearer token and
//!   injects [`TokenClaims`] into request extensions.
//!
//! - **Protected Resource Metadata** ([`ProtectedResourceMetadata`]): served at
//!   `/proxy/{server}/.well-known/oauth-protected-resource` (RFC 9728).
//!
//! # Discovery Flow
//!
//! 1. Client calls `/proxy/{server}/mcp` without a token
//! 2. Gateway returns `401` with `WWW-Authenticate: Bearer resource_metadata="..."`
//! 3. Client fetches the metadata document to discover the authorization servers
//! 4. Client obtains a token whose audience is the server's audience
//! 5. Client retries with `Authorization: Bearer <token>`

pub mod error;
pub mod jwks;
pub mod metadata;
pub mod middleware;
pub mod scope;
pub mod token;
pub mod validator;

// Re-exports
pub use error::OAuthError;
pub use jwks::{JwksCache, JwksError, jwks_url};
pub use metadata::{AuthorizationServerRef, ProtectedResourceMetadata};
pub use middleware::{AuthLayer, AuthService};
pub use scope::ScopeRequirement;
pub use token::{TokenAudience, TokenClaims};
pub use validator::{JwksAuthenticator, TokenAuthenticator};
