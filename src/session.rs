//! Session manager
//!
//! Sessions are opened by `initialize` and bound to the server, tenant and
//! authenticated claims of that call. A session is usable while it has been
//! idle for no longer than the configured TTL. Expiry is evaluated lazily
//! on lookup; [`SessionManager::cleanup_expired`] is an explicit eviction
//! pass for callers that want one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::RwLock;

use crate::oauth::token::TokenClaims;

/// Default session TTL: 30 minutes
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

/// Default maximum number of sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Session id length in bytes, before hex encoding
const SESSION_ID_BYTES: usize = 16;

/// Session lookup and creation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session limit reached ({0})")]
    CapacityExceeded(usize),
}

/// Snapshot of a session, as returned by [`SessionManager::create`] and
/// [`SessionManager::get`]
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub server_slug: String,
    pub tenant_slug: String,
    /// Milliseconds since UNIX epoch
    pub created_at: u64,
    /// Milliseconds since UNIX epoch
    pub last_accessed: u64,
    /// Claims of the token that opened the session (absent in unprotected mode)
    pub claims: Option<TokenClaims>,
}

#[derive(Debug)]
struct SessionRecord {
    id: String,
    server_slug: String,
    tenant_slug: String,
    created_at: u64,
    claims: Option<TokenClaims>,
    last_accessed: AtomicU64,
}

impl SessionRecord {
    fn touch(&self) {
        self.last_accessed
            .store(current_timestamp_ms(), Ordering::Relaxed);
    }

    fn is_expired(&self, ttl_ms: u64) -> bool {
        let last = self.last_accessed.load(Ordering::Relaxed);
        current_timestamp_ms().saturating_sub(last) > ttl_ms
    }

    fn snapshot(&self) -> Session {
        Session {
            id: self.id.clone(),
            server_slug: self.server_slug.clone(),
            tenant_slug: self.tenant_slug.clone(),
            created_at: self.created_at,
            last_accessed: self.last_accessed.load(Ordering::Relaxed),
            claims: self.claims.clone(),
        }
    }
}

/// Get current timestamp in milliseconds since UNIX epoch
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// 128 bits from the OS RNG, hex encoded
fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Table of live sessions, shared behind an `Arc`
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionRecord>>>,
    /// Session time-to-live in milliseconds
    ttl_ms: u64,
    max_sessions: usize,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl_ms: DEFAULT_SESSION_TTL_SECS * 1000,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Open a session bound to a server, its tenant and the caller's claims.
    pub async fn create(
        &self,
        server_slug: &str,
        tenant_slug: &str,
        claims: Option<TokenClaims>,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.max_sessions {
            tracing::warn!(
                max = self.max_sessions,
                current = sessions.len(),
                "Session limit reached, rejecting new session"
            );
            return Err(SessionError::CapacityExceeded(self.max_sessions));
        }

        let now = current_timestamp_ms();
        let record = Arc::new(SessionRecord {
            id: generate_session_id(),
            server_slug: server_slug.to_string(),
            tenant_slug: tenant_slug.to_string(),
            created_at: now,
            claims,
            last_accessed: AtomicU64::new(now),
        });
        sessions.insert(record.id.clone(), record.clone());
        tracing::debug!(
            session_id = %record.id,
            server = %server_slug,
            total = sessions.len(),
            "Created new session"
        );
        Ok(record.snapshot())
    }

    /// Look a session up and mark it as used.
    ///
    /// An expired session is removed and reported as [`SessionError::Expired`];
    /// later lookups of the same id see [`SessionError::NotFound`].
    pub async fn get(&self, id: &str) -> Result<Session, SessionError> {
        {
            let sessions = self.sessions.read().await;
            let record = sessions.get(id).ok_or(SessionError::NotFound)?;
            if !record.is_expired(self.ttl_ms) {
                record.touch();
                return Ok(record.snapshot());
            }
        }

        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            // Touched by a concurrent lookup between the two locks
            Some(record) if !record.is_expired(self.ttl_ms) => {
                record.touch();
                Ok(record.snapshot())
            }
            Some(_) => {
                sessions.remove(id);
                tracing::debug!(session_id = %id, "Session expired on access");
                Err(SessionError::Expired)
            }
            None => Err(SessionError::NotFound),
        }
    }

    /// Remove a session. Returns true if it existed; deleting an unknown id is harmless.
    pub async fn delete(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(id).is_some();
        if removed {
            tracing::debug!(session_id = %id, total = sessions.len(), "Removed session");
        }
        removed
    }

    /// Remove all expired sessions
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, record| {
            let expired = record.is_expired(self.ttl_ms);
            if expired {
                tracing::debug!(session_id = %id, "Removing expired session");
            }
            !expired
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(
                removed = removed,
                remaining = sessions.len(),
                "Cleaned up expired sessions"
            );
        }
        removed
    }

    /// Number of sessions currently held, expired or not
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
