//! Authenticated token claims.
//!
//! [`TokenClaims`] is what the authentication gate attaches to a request once
//! a bearer token has been verified. It is captured into the session at
//! `initialize` and consulted for scope checks on `tools/call`.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Audience claim value, which can be a single string or array of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenAudience {
    /// A single audience string.
    Single(String),
    /// Multiple audience strings.
    Multiple(Vec<String>),
}

/// Validated token claims extracted from an access token.
///
/// Contains standard JWT claims plus an `extra` map for custom claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user/client identifier).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issuer URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience (this resource server or other identifiers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<TokenAudience>,

    /// Expiration time (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Not-before time (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Issued-at time (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Space-delimited scope string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// OAuth client ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Additional claims not covered by standard fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TokenClaims {
    /// All granted scopes.
    ///
    /// Merges the space separated `scope` claim with a `scopes` array claim,
    /// which some authorization servers emit instead.
    pub fn scopes(&self) -> BTreeSet<String> {
        let mut scopes: BTreeSet<String> = self
            .scope
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .map(String::from)
            .collect();

        if let Some(serde_json::Value::Array(items)) = self.extra.get("scopes") {
            scopes.extend(
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .flat_map(str::split_whitespace)
                    .map(String::from),
            );
        }
        scopes
    }

    /// Check if the token has a specific scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: serde_json::Value) -> TokenClaims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_token_claims_scopes() {
        let claims = claims(json!({ "scope": "read:orders write:orders" }));
        assert_eq!(claims.scopes().len(), 2);
        assert!(claims.has_scope("read:orders"));
        assert!(!claims.has_scope("admin"));
    }

    #[test]
    fn test_scope_string_and_array_are_merged() {
        let claims = claims(json!({
            "scope": "read:orders",
            "scopes": ["write:orders", "read:orders", 7]
        }));
        let scopes = claims.scopes();
        assert_eq!(scopes.len(), 2);
        assert!(scopes.contains("write:orders"));
    }

    #[test]
    fn test_token_claims_empty_scope() {
        let claims = claims(json!({ "sub": "user" }));
        assert!(claims.scopes().is_empty());
        assert!(!claims.has_scope("read:orders"));
    }

    #[test]
    fn test_audience_single_or_list() {
        let single = claims(json!({ "aud": "https://gw.example.com/sales" }));
        assert!(matches!(single.aud, Some(TokenAudience::Single(ref a)) if a == "https://gw.example.com/sales"));

        let list = claims(json!({ "aud": ["a", "https://gw.example.com/sales"] }));
        assert!(matches!(list.aud, Some(TokenAudience::Multiple(ref v)) if v.len() == 2));
    }

    #[test]
    fn test_unknown_claims_are_kept() {
        let claims = claims(json!({ "sub": "user", "tenant": "tenant-a" }));
        assert_eq!(claims.extra["tenant"], "tenant-a");
    }
}
