//! Gateway transports
//!
//! - `http` - the HTTP front door: proxy endpoints, discovery and health
//!
//! ## Synchronization and Thread Safety
//!
//! Every request runs on its own task. Shared state (session table, key-set
//! cache, configuration store) lives behind `Arc` and `RwLock`, so handlers
//! never hold a lock across an upstream call.

pub mod http;

pub use http::{
    GatewayTransport, HEALTH_PATH, MCP_PROTOCOL_VERSION_HEADER, MCP_SESSION_ID_HEADER,
};
