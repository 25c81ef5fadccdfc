//! Multi-issuer bearer token validation.
//!
//! A token is accepted when any one of the candidate issuers vouches for it:
//! the signature verifies against a key that issuer publishes, `iss` names
//! that issuer exactly, `aud` contains the required audience and the token
//! is inside its validity window. Issuers are tried in order and the first
//! success wins.

use std::future::Future;
use std::sync::Arc;

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};

use super::error::OAuthError;
use super::jwks::{JwksCache, jwks_url};
use super::token::TokenClaims;

/// Description returned for every rejected token; the per-issuer reason is only logged.
const REJECTED: &str = "token could not be validated";

/// Trait for authenticating bearer tokens against a set of trusted issuers.
///
/// The authentication gate is generic over this trait so tests can swap in
/// a static implementation.
pub trait TokenAuthenticator: Clone + Send + Sync + 'static {
    /// Validate `token` against each of `issuers` in turn, requiring `audience`.
    fn authenticate(
        &self,
        issuers: &[String],
        token: &str,
        audience: &str,
    ) -> impl Future<Output = Result<TokenClaims, OAuthError>> + Send;
}

/// [`TokenAuthenticator`] that verifies JWTs with keys from each issuer's JWKS endpoint
#[derive(Debug, Clone)]
pub struct JwksAuthenticator {
    cache: Arc<JwksCache>,
}

impl JwksAuthenticator {
    pub fn new(cache: Arc<JwksCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<JwksCache> {
        &self.cache
    }

    /// Key set for `issuer`, refreshed once if the token names a `kid` it lacks.
    async fn keys_for(&self, issuer: &str, kid: Option<&str>) -> Option<Arc<JwkSet>> {
        let url = jwks_url(issuer);
        let keys = match self.cache.get(&url).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::debug!(issuer = %issuer, error = %e, "Key set unavailable, trying next issuer");
                return None;
            }
        };

        if let Some(kid) = kid
            && keys.find(kid).is_none()
        {
            tracing::debug!(issuer = %issuer, kid = %kid, "Unknown key id, refreshing key set");
            return match self.cache.refresh(&url).await {
                Ok(refreshed) => Some(refreshed),
                Err(e) => {
                    tracing::debug!(issuer = %issuer, error = %e, "Key set refresh failed");
                    Some(keys)
                }
            };
        }
        Some(keys)
    }
}

impl TokenAuthenticator for JwksAuthenticator {
    async fn authenticate(
        &self,
        issuers: &[String],
        token: &str,
        audience: &str,
    ) -> Result<TokenClaims, OAuthError> {
        let rejected = || OAuthError::InvalidToken {
            description: REJECTED.to_string(),
        };

        let header = jsonwebtoken::decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Malformed token header");
            rejected()
        })?;

        for issuer in issuers {
            let Some(keys) = self.keys_for(issuer, header.kid.as_deref()).await else {
                continue;
            };

            match verify(&keys, &header, token, issuer, audience) {
                Ok(claims) => {
                    tracing::debug!(issuer = %issuer, sub = ?claims.sub, "Token accepted");
                    return Ok(claims);
                }
                Err(reason) => {
                    tracing::debug!(issuer = %issuer, reason = %reason, "Token rejected by issuer");
                }
            }
        }

        Err(rejected())
    }
}

/// Verify a token against one issuer's key set.
fn verify(
    keys: &JwkSet,
    header: &Header,
    token: &str,
    issuer: &str,
    audience: &str,
) -> Result<TokenClaims, String> {
    let candidates: Vec<&Jwk> = match header.kid.as_deref() {
        Some(kid) => keys
            .keys
            .iter()
            .filter(|k| k.common.key_id.as_deref() == Some(kid))
            .collect(),
        None => keys.keys.iter().collect(),
    };
    if candidates.is_empty() {
        return Err("no matching key".to_string());
    }

    let validation = validation_for(header.alg, issuer, audience);
    let mut last_error = String::from("no key accepts the token algorithm");

    for jwk in candidates {
        if !key_accepts(jwk, header.alg) {
            continue;
        }
        let key = match DecodingKey::from_jwk(jwk) {
            Ok(key) => key,
            Err(e) => {
                last_error = format!("unusable key: {}", e);
                continue;
            }
        };
        match jsonwebtoken::decode::<TokenClaims>(token, &key, &validation) {
            Ok(data) => return Ok(data.claims),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(last_error)
}

/// Exact `iss`, `aud` containing `audience`, `exp`/`nbf` when present, no leeway.
fn validation_for(alg: Algorithm, issuer: &str, audience: &str) -> Validation {
    let mut validation = Validation::new(alg);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);
    validation.required_spec_claims = ["iss", "aud"].iter().map(|c| c.to_string()).collect();
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;
    validation
}

/// The token algorithm must belong to the key's family and, if the key
/// declares an algorithm, equal it.
fn key_accepts(jwk: &Jwk, alg: Algorithm) -> bool {
    let family_ok = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => matches!(
            alg,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ),
        AlgorithmParameters::EllipticCurve(_) => matches!(alg, Algorithm::ES256 | Algorithm::ES384),
        AlgorithmParameters::OctetKey(_) => {
            matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
        }
        AlgorithmParameters::OctetKeyPair(_) => alg == Algorithm::EdDSA,
    };
    if !family_ok {
        return false;
    }

    match &jwk.common.key_algorithm {
        Some(declared) => algorithm_name(declared) == algorithm_name(&alg),
        None => true,
    }
}

/// Registered JOSE name ("RS256", "EdDSA", ...) of an algorithm value
fn algorithm_name<T: serde::Serialize>(alg: &T) -> Option<String> {
    serde_json::to_value(alg)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, encode};
    use serde_json::json;

    const ISSUER_A: &str = "https://idp-a.example.com";
    const ISSUER_B: &str = "https://idp-b.example.com";
    const AUDIENCE: &str = "https://gateway.example.com/sales";
    const SECRET_A: &[u8] = b"gateway-test-secret-0123456789ab";
    const SECRET_B: &[u8] = b"other-issuer-secret-0123456789ab";

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn oct_set(kid: &str, k: &str, alg: Option<&str>) -> JwkSet {
        let mut key = json!({ "kty": "oct", "kid": kid, "k": k });
        if let Some(alg) = alg {
            key["alg"] = json!(alg);
        }
        serde_json::from_value(json!({ "keys": [key] })).unwrap()
    }

    async fn authenticator() -> JwksAuthenticator {
        let cache = Arc::new(JwksCache::new());
        cache
            .insert(
                jwks_url(ISSUER_A),
                oct_set("a1", "Z2F0ZXdheS10ZXN0LXNlY3JldC0wMTIzNDU2Nzg5YWI", Some("HS256")),
            )
            .await;
        cache
            .insert(
                jwks_url(ISSUER_B),
                oct_set("b1", "b3RoZXItaXNzdWVyLXNlY3JldC0wMTIzNDU2Nzg5YWI", None),
            )
            .await;
        JwksAuthenticator::new(cache)
    }

    fn sign(kid: &str, secret: &[u8], alg: Algorithm, claims: serde_json::Value) -> String {
        let mut header = Header::new(alg);
        header.kid = Some(kid.to_string());
        encode(&header, &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn issuers() -> Vec<String> {
        vec![ISSUER_A.to_string(), ISSUER_B.to_string()]
    }

    #[tokio::test]
    async fn test_valid_token_returns_claims() {
        let auth = authenticator().await;
        let token = sign(
            "a1",
            SECRET_A,
            Algorithm::HS256,
            json!({ "iss": ISSUER_A, "aud": AUDIENCE, "sub": "u1", "exp": now() + 300, "scope": "read:orders" }),
        );

        let claims = auth.authenticate(&issuers(), &token, AUDIENCE).await.unwrap();
        assert_eq!(claims.sub.as_deref(), Some("u1"));
        assert!(claims.has_scope("read:orders"));
    }

    #[tokio::test]
    async fn test_second_issuer_is_tried() {
        let auth = authenticator().await;
        let token = sign(
            "b1",
            SECRET_B,
            Algorithm::HS384,
            json!({ "iss": ISSUER_B, "aud": [AUDIENCE, "other"], "exp": now() + 300 }),
        );

        let claims = auth.authenticate(&issuers(), &token, AUDIENCE).await.unwrap();
        assert_eq!(claims.iss.as_deref(), Some(ISSUER_B));
    }

    #[tokio::test]
    async fn test_audience_mismatch_fails() {
        let auth = authenticator().await;
        let token = sign(
            "a1",
            SECRET_A,
            Algorithm::HS256,
            json!({ "iss": ISSUER_A, "aud": "https://gateway.example.com/products", "exp": now() + 300 }),
        );

        let err = auth.authenticate(&issuers(), &token, AUDIENCE).await.unwrap_err();
        assert!(matches!(err, OAuthError::InvalidToken { ref description } if description == REJECTED));
    }

    #[tokio::test]
    async fn test_issuer_must_match_the_key_owner() {
        let auth = authenticator().await;
        // Signed with A's key but claims to be B
        let token = sign(
            "a1",
            SECRET_A,
            Algorithm::HS256,
            json!({ "iss": ISSUER_B, "aud": AUDIENCE, "exp": now() + 300 }),
        );
        assert!(auth.authenticate(&issuers(), &token, AUDIENCE).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_and_immature_tokens_fail() {
        let auth = authenticator().await;
        let expired = sign(
            "a1",
            SECRET_A,
            Algorithm::HS256,
            json!({ "iss": ISSUER_A, "aud": AUDIENCE, "exp": now() - 10 }),
        );
        assert!(auth.authenticate(&issuers(), &expired, AUDIENCE).await.is_err());

        let immature = sign(
            "a1",
            SECRET_A,
            Algorithm::HS256,
            json!({ "iss": ISSUER_A, "aud": AUDIENCE, "nbf": now() + 600 }),
        );
        assert!(auth.authenticate(&issuers(), &immature, AUDIENCE).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_aud_fails() {
        let auth = authenticator().await;
        let token = sign(
            "a1",
            SECRET_A,
            Algorithm::HS256,
            json!({ "iss": ISSUER_A, "exp": now() + 300 }),
        );
        assert!(auth.authenticate(&issuers(), &token, AUDIENCE).await.is_err());
    }

    #[tokio::test]
    async fn test_declared_key_algorithm_is_enforced() {
        let auth = authenticator().await;
        // Key a1 declares HS256
        let token = sign(
            "a1",
            SECRET_A,
            Algorithm::HS512,
            json!({ "iss": ISSUER_A, "aud": AUDIENCE, "exp": now() + 300 }),
        );
        assert!(auth.authenticate(&issuers(), &token, AUDIENCE).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_issuer_list_fails() {
        let auth = authenticator().await;
        let token = sign(
            "a1",
            SECRET_A,
            Algorithm::HS256,
            json!({ "iss": ISSUER_A, "aud": AUDIENCE, "exp": now() + 300 }),
        );
        assert!(auth.authenticate(&[], &token, AUDIENCE).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_token_fails() {
        let auth = authenticator().await;
        assert!(auth.authenticate(&issuers(), "not-a-jwt", AUDIENCE).await.is_err());
    }

    #[test]
    fn test_key_family_must_match_algorithm() {
        let set = oct_set("k", "c2VjcmV0", None);
        let jwk = &set.keys[0];
        assert!(key_accepts(jwk, Algorithm::HS256));
        assert!(!key_accepts(jwk, Algorithm::RS256));
        assert!(!key_accepts(jwk, Algorithm::EdDSA));
    }
}
