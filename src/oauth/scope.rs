//! OAuth scope requirements.
//!
//! A tool declares the scopes a caller must hold; [`ScopeRequirement`]
//! checks them against the caller's claims.

use std::collections::BTreeSet;

use super::error::OAuthError;
use super::token::TokenClaims;

/// A set of required OAuth scopes for an operation.
///
/// All scopes in the requirement must be present in the token for access
/// to be granted (AND semantics).
#[derive(Debug, Clone, Default)]
pub struct ScopeRequirement {
    required: BTreeSet<String>,
}

impl ScopeRequirement {
    /// Create a scope requirement from multiple scopes.
    pub fn all(scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if the given token claims satisfy this requirement.
    ///
    /// Returns `Err(OAuthError::InsufficientScope)` listing every required
    /// scope (sorted) and the scopes the token does carry.
    pub fn check(&self, claims: &TokenClaims) -> Result<(), OAuthError> {
        if self.required.is_empty() {
            return Ok(());
        }

        let provided = claims.scopes();
        if self.required.is_subset(&provided) {
            Ok(())
        } else {
            Err(OAuthError::InsufficientScope {
                required: self.required.iter().cloned().collect(),
                provided: provided.into_iter().collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_with_scope(scope: &str) -> TokenClaims {
        serde_json::from_value(serde_json::json!({ "scope": scope })).unwrap()
    }

    #[test]
    fn test_empty_requirement_passes() {
        let req = ScopeRequirement::all(Vec::<String>::new());
        assert!(req.check(&claims_with_scope("")).is_ok());
    }

    #[test]
    fn test_all_scopes_present() {
        let req = ScopeRequirement::all(["read:orders", "write:orders"]);
        assert!(req.check(&claims_with_scope("write:orders read:orders admin")).is_ok());
    }

    #[test]
    fn test_missing_scope_reports_requirement() {
        let req = ScopeRequirement::all(["write:orders", "read:orders"]);
        match req.check(&claims_with_scope("read:orders")) {
            Err(OAuthError::InsufficientScope { required, provided }) => {
                assert_eq!(required, vec!["read:orders", "write:orders"]);
                assert_eq!(provided, vec!["read:orders"]);
            }
            other => panic!("expected InsufficientScope, got {:?}", other),
        }
    }
}
