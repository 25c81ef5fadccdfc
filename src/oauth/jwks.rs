//! Key-set cache for JWKS endpoints.
//!
//! Entries are keyed by the key-set URL. A fresh entry is served from memory;
//! a stale one is refetched, and if that refetch fails the last known good
//! set keeps being served without another attempt until the minimum refresh
//! interval has passed. Concurrent first uses of one URL are not coalesced:
//! each may fetch, and the last writer wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use tokio::sync::RwLock;

/// How long a fetched key set is served without refetching
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Minimum spacing between forced refreshes of one URL
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Bound on a single key-set fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Key-set location for an issuer: `<issuer>/.well-known/jwks.json`
pub fn jwks_url(issuer: &str) -> String {
    format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'))
}

/// Key-set fetch failures
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("failed to fetch key set from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("key set endpoint {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("invalid key set from {url}: {reason}")]
    Parse { url: String, reason: String },
}

#[derive(Debug)]
struct CacheEntry {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
    /// Last forced refresh attempt, successful or not
    refresh_attempted_at: Instant,
    /// Start of the last refetch of this entry after it went stale. Cleared
    /// when a fetch succeeds.
    stale_attempted_at: Option<Instant>,
}

/// Shared cache of JWK sets, one entry per key-set URL
#[derive(Debug)]
pub struct JwksCache {
    client: reqwest::Client,
    entries: RwLock<HashMap<String, CacheEntry>>,
    refresh_interval: Duration,
    min_refresh_interval: Duration,
    fetch_timeout: Duration,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            entries: RwLock::new(HashMap::new()),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl JwksCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Get the key set published at `url`.
    ///
    /// Returns the cached set while it is fresh. Otherwise refetches; a failed
    /// refetch falls back to the cached set when there is one, and further
    /// refetches of that entry wait for the minimum refresh interval.
    pub async fn get(&self, url: &str) -> Result<Arc<JwkSet>, JwksError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(url)
                && entry.fetched_at.elapsed() < self.refresh_interval
            {
                return Ok(entry.keys.clone());
            }
        }

        let stale = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(url) {
                Some(entry) if entry.fetched_at.elapsed() < self.refresh_interval => {
                    return Ok(entry.keys.clone());
                }
                Some(entry) => {
                    if entry
                        .stale_attempted_at
                        .is_some_and(|at| at.elapsed() < self.min_refresh_interval)
                    {
                        tracing::debug!(
                            url = %url,
                            "Key set refetch backing off, serving cached keys"
                        );
                        return Ok(entry.keys.clone());
                    }
                    entry.stale_attempted_at = Some(Instant::now());
                    Some(entry.keys.clone())
                }
                None => None,
            }
        };

        match self.fetch(url).await {
            Ok(keys) => Ok(self.store(url, keys).await),
            Err(err) => match stale {
                Some(keys) => {
                    tracing::warn!(
                        url = %url,
                        error = %err,
                        "Key set refresh failed, serving last known good keys"
                    );
                    Ok(keys)
                }
                None => Err(err),
            },
        }
    }

    /// Refetch the key set now, e.g. after a token named an unknown `kid`.
    ///
    /// Attempts within the minimum refresh interval of the previous one
    /// return the cached set without touching the network.
    pub async fn refresh(&self, url: &str) -> Result<Arc<JwkSet>, JwksError> {
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(url) {
                if entry.refresh_attempted_at.elapsed() < self.min_refresh_interval {
                    tracing::debug!(url = %url, "Key set refresh rate limited");
                    return Ok(entry.keys.clone());
                }
                entry.refresh_attempted_at = Instant::now();
            }
        }

        let keys = self.fetch(url).await?;
        tracing::debug!(url = %url, keys = keys.keys.len(), "Key set refreshed");
        Ok(self.store(url, keys).await)
    }

    /// Seed the cache with a key set, as if it had just been fetched
    pub async fn insert(&self, url: impl Into<String>, keys: JwkSet) {
        self.store(&url.into(), keys).await;
    }

    async fn store(&self, url: &str, keys: JwkSet) -> Arc<JwkSet> {
        let keys = Arc::new(keys);
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.insert(
            url.to_string(),
            CacheEntry {
                keys: keys.clone(),
                fetched_at: now,
                refresh_attempted_at: now,
                stale_attempted_at: None,
            },
        );
        keys
    }

    async fn fetch(&self, url: &str) -> Result<JwkSet, JwksError> {
        let response = self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| JwksError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(JwksError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| JwksError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        serde_json::from_slice(&body).map_err(|e| JwksError::Parse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}
