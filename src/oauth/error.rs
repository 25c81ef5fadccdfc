//! OAuth 2.1 error types and WWW-Authenticate header construction.
//!
//! Implements error responses per RFC 6750 Section 3, including the
//! `resource_metadata` parameter from RFC 9728 for Protected Resource
//! Metadata discovery.

use std::fmt;

/// OAuth 2.1 authentication/authorization error.
///
/// Each variant maps to a specific HTTP status code and `WWW-Authenticate`
/// header value per RFC 6750 Section 3.
#[derive(Debug, Clone)]
pub enum OAuthError {
    /// No bearer token was provided in the request.
    /// Returns HTTP 401 with `WWW-Authenticate: Bearer`.
    MissingToken,

    /// The provided token is invalid (malformed, signature mismatch, wrong
    /// issuer or audience, outside its validity window).
    /// Returns HTTP 401 with `error="invalid_token"`.
    InvalidToken {
        /// Human-readable description of why the token is invalid.
        description: String,
    },

    /// The token's scopes are insufficient for the requested operation.
    /// Returns HTTP 403 with `error="insufficient_scope"`.
    InsufficientScope {
        /// Scopes required by the operation.
        required: Vec<String>,
        /// Scopes present in the token.
        provided: Vec<String>,
    },

    /// The addressed server, or its tenant, is unknown or disabled.
    /// Returns HTTP 401 with `error="invalid_request"`.
    UnknownServer,
}

impl OAuthError {
    /// Returns the HTTP status code for this error.
    ///
    /// - 401 Unauthorized for authentication failures
    /// - 403 Forbidden for authorization failures (insufficient scope)
    pub fn status_code(&self) -> u16 {
        match self {
            OAuthError::InsufficientScope { .. } => 403,
            _ => 401,
        }
    }

    /// Builds the `WWW-Authenticate` header value per RFC 6750 Section 3.
    ///
    /// When `resource_metadata_url` is provided, includes the `resource_metadata`
    /// parameter per RFC 9728 so clients can discover the authorization server.
    pub fn www_authenticate(&self, resource_metadata_url: Option<&str>) -> String {
        let mut parts = Vec::new();

        if let Some(url) = resource_metadata_url {
            parts.push(format!("resource_metadata=\"{}\"", url));
        }

        match self {
            OAuthError::MissingToken => {
                // RFC 6750 Section 3: no error code when the request carried no credentials
                if parts.is_empty() {
                    return "Bearer".to_string();
                }
            }
            OAuthError::InvalidToken { description } => {
                parts.push("error=\"invalid_token\"".to_string());
                parts.push(format!("error_description=\"{}\"", description));
            }
            OAuthError::InsufficientScope { required, .. } => {
                parts.push("error=\"insufficient_scope\"".to_string());
                if !required.is_empty() {
                    parts.push(format!("scope=\"{}\"", required.join(" ")));
                }
            }
            OAuthError::UnknownServer => {
                parts.push("error=\"invalid_request\"".to_string());
                parts.push("error_description=\"unknown server\"".to_string());
            }
        }
        format!("Bearer {}", parts.join(", "))
    }
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OAuthError::MissingToken => write!(f, "missing bearer token"),
            OAuthError::InvalidToken { description } => {
                write!(f, "invalid token: {}", description)
            }
            OAuthError::InsufficientScope { required, provided } => write!(
                f,
                "insufficient scope: required [{}], provided [{}]",
                required.join(", "),
                provided.join(", ")
            ),
            OAuthError::UnknownServer => write!(f, "unknown or disabled server"),
        }
    }
}

impl std::error::Error for OAuthError {}
