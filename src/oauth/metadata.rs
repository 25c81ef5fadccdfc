//! Protected Resource Metadata (RFC 9728 Section 3).
//!
//! Defines the document served at
//! `/proxy/{server}/.well-known/oauth-protected-resource` so OAuth clients
//! can discover which authorization servers issue tokens for a server.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::store::{Server, Tenant, Tool};

/// An authorization server a client may obtain tokens from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationServerRef {
    pub issuer: String,
    /// OpenID discovery document of the issuer
    pub metadata_url: String,
}

impl AuthorizationServerRef {
    pub fn new(issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let metadata_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        Self {
            issuer,
            metadata_url,
        }
    }
}

/// Protected Resource Metadata per RFC 9728 Section 3.
///
/// # Example
///
/// ```rust
/// use mcp_gateway::oauth::ProtectedResourceMetadata;
///
/// let metadata = ProtectedResourceMetadata::new("https://gateway.example.com/sales")
///     .authorization_server("https://auth.example.com")
///     .scope("read:orders");
///
/// assert_eq!(
///     metadata.authorization_servers[0].metadata_url,
///     "https://auth.example.com/.well-known/openid-configuration"
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The audience tokens must carry for this resource.
    pub resource: String,

    /// Authorization servers that can issue tokens for this resource.
    #[serde(default)]
    pub authorization_servers: Vec<AuthorizationServerRef>,

    #[serde(default = "default_token_formats")]
    pub token_formats_supported: Vec<String>,

    /// OAuth scopes used by this resource's tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,

    /// Methods supported for sending bearer tokens.
    ///
    /// Defaults to `["header"]` per RFC 6750.
    #[serde(default = "default_bearer_methods")]
    pub bearer_methods_supported: Vec<String>,
}

fn default_bearer_methods() -> Vec<String> {
    vec!["header".to_string()]
}

fn default_token_formats() -> Vec<String> {
    vec!["jwt".to_string()]
}

impl ProtectedResourceMetadata {
    /// Create new metadata with the resource server's identifier.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            authorization_servers: Vec::new(),
            token_formats_supported: default_token_formats(),
            scopes_supported: Vec::new(),
            bearer_methods_supported: default_bearer_methods(),
        }
    }

    /// Describe a configured server: its audience, the issuers it trusts
    /// (duplicates dropped, order kept) and the scopes its enabled tools require.
    pub fn for_server(server: &Server, tenant: &Tenant, tools: &[Tool]) -> Self {
        let mut metadata = Self::new(server.audience.clone());

        for issuer in server.candidate_issuers(tenant) {
            if !metadata
                .authorization_servers
                .iter()
                .any(|a| &a.issuer == issuer)
            {
                metadata = metadata.authorization_server(issuer.clone());
            }
        }

        let scopes: BTreeSet<&String> = tools
            .iter()
            .filter(|t| t.enabled)
            .flat_map(|t| t.required_scopes.iter())
            .collect();
        for scope in scopes {
            metadata = metadata.scope(scope.clone());
        }
        metadata
    }

    /// Add an authorization server issuer URL.
    pub fn authorization_server(mut self, issuer_url: impl Into<String>) -> Self {
        self.authorization_servers
            .push(AuthorizationServerRef::new(issuer_url));
        self
    }

    /// Add a supported OAuth scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes_supported.push(scope.into());
        self
    }

    /// Returns the well-known path of this document, relative to a server's base path.
    pub fn well_known_path() -> &'static str {
        "/.well-known/oauth-protected-resource"
    }
}
