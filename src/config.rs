//! Gateway configuration.
//!
//! Loaded from a TOML file, then overridden from the environment. The same
//! file carries the seed data (tenants, servers, tools) for the in-memory
//! configuration store.
//!
//! ```toml
//! listen_addr = "0.0.0.0:8080"
//! public_url = "https://gateway.example.com"
//!
//! [session]
//! ttl_secs = 1800
//!
//! [[tenants]]
//! slug = "tenant-a"
//! allowed_issuers = ["https://auth.example.com"]
//! egress_allowlist = ["api.example.com"]
//!
//! [[servers]]
//! slug = "sales"
//! tenant = "tenant-a"
//! audience = "https://gateway.example.com/sales"
//! upstream_base_url = "https://api.example.com"
//!
//! [[tools]]
//! server = "sales"
//! name = "getOrder"
//! required_scopes = ["read:orders"]
//! mapping = { method = "GET", path = "/api/orders/{{orderId}}" }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;
use crate::engine::{DEFAULT_UPSTREAM_TIMEOUT, ExecutionEngine, ExecutionError};
use crate::oauth::jwks::{DEFAULT_FETCH_TIMEOUT, DEFAULT_MIN_REFRESH_INTERVAL, DEFAULT_REFRESH_INTERVAL};
use crate::oauth::{JwksAuthenticator, JwksCache};
use crate::session::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL_SECS, SessionManager};
use crate::store::{MemoryStore, SeedData, StoreError};
use crate::transport::GatewayTransport;

/// Errors raised while loading configuration or wiring components from it
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid seed data: {0}")]
    Seed(#[from] StoreError),

    #[error("failed to build upstream client: {0}")]
    Engine(#[from] ExecutionError),
}

/// Session table settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Run the expiry sweep this often. Unset means expiry is lazy only.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

fn default_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_sessions: default_max_sessions(),
            sweep_interval_secs: None,
        }
    }
}

/// Key-set cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_min_refresh_interval_secs")]
    pub min_refresh_interval_secs: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL.as_secs()
}

fn default_min_refresh_interval_secs() -> u64 {
    DEFAULT_MIN_REFRESH_INTERVAL.as_secs()
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            min_refresh_interval_secs: default_min_refresh_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

/// Upstream HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_upstream_timeout_secs() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT.as_secs()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Base URL used in discovery hints; `http://<Host header>` when unset
    #[serde(default)]
    pub public_url: Option<String>,

    /// Disable authentication and scope checks. Development only.
    #[serde(default)]
    pub unprotected: bool,

    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub jwks: JwksConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(flatten)]
    pub seed: SeedData,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            public_url: None,
            unprotected: false,
            allowed_origins: Vec::new(),
            session: SessionConfig::default(),
            jwks: JwksConfig::default(),
            upstream: UpstreamConfig::default(),
            seed: SeedData::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: GatewayConfig = toml::from_str(&contents)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `HTTP_ADDR`, `GATEWAY_PUBLIC_URL`,
    /// `GATEWAY_UNPROTECTED`, `GATEWAY_ALLOWED_ORIGINS` (comma separated) and
    /// `GATEWAY_SESSION_TTL_SECS`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = var("HTTP_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(url) = var("GATEWAY_PUBLIC_URL") {
            self.public_url = Some(url);
        }
        if let Some(flag) = var("GATEWAY_UNPROTECTED") {
            self.unprotected = parse_flag(&flag).ok_or_else(|| {
                ConfigError::Invalid(format!("GATEWAY_UNPROTECTED: expected a boolean, got '{}'", flag))
            })?;
        }
        if let Some(origins) = var("GATEWAY_ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(ttl) = var("GATEWAY_SESSION_TTL_SECS") {
            self.session.ttl_secs = ttl.parse().map_err(|_| {
                ConfigError::Invalid(format!("GATEWAY_SESSION_TTL_SECS: expected seconds, got '{}'", ttl))
            })?;
        }
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.ttl_secs == 0 {
            return Err(ConfigError::Invalid("session.ttl_secs must be > 0".into()));
        }
        if self.session.max_sessions == 0 {
            return Err(ConfigError::Invalid("session.max_sessions must be > 0".into()));
        }
        if self.session.sweep_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "session.sweep_interval_secs must be > 0".into(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::Invalid("upstream.timeout_secs must be > 0".into()));
        }
        if let Some(url) = &self.public_url {
            url::Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("public_url '{}': {}", url, e)))?;
        }
        Ok(())
    }

    /// Wire the store, session table, key-set cache and execution engine
    /// described by this configuration into a ready transport.
    pub fn transport(&self) -> Result<GatewayTransport<JwksAuthenticator>, ConfigError> {
        let store = Arc::new(MemoryStore::from_seed(&self.seed)?);

        let sessions = Arc::new(
            SessionManager::new()
                .with_ttl(Duration::from_secs(self.session.ttl_secs))
                .with_max_sessions(self.session.max_sessions),
        );

        let engine = ExecutionEngine::with_timeout(Duration::from_secs(self.upstream.timeout_secs))?;

        let cache = JwksCache::new()
            .refresh_interval(Duration::from_secs(self.jwks.refresh_interval_secs))
            .min_refresh_interval(Duration::from_secs(self.jwks.min_refresh_interval_secs))
            .fetch_timeout(Duration::from_secs(self.jwks.fetch_timeout_secs));

        let dispatcher = Dispatcher::new(store, sessions, engine);
        let mut transport =
            GatewayTransport::new(dispatcher, JwksAuthenticator::new(Arc::new(cache)))
                .allowed_origins(self.allowed_origins.clone())
                .unprotected(self.unprotected);
        if let Some(url) = &self.public_url {
            transport = transport.public_url(url.clone());
        }
        if let Some(secs) = self.session.sweep_interval_secs {
            transport = transport.sweep_interval(Duration::from_secs(secs));
        }
        Ok(transport)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
