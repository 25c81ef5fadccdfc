//! # mcp-gateway
//!
//! Multi-tenant Model Context Protocol (MCP) gateway built on
//! [Tower](https://docs.rs/tower) and [axum](https://docs.rs/axum).
//!
//! Each tenant owns one or more MCP *servers*, each exposed at
//! `/proxy/{server}/mcp`. A server's *tools* are not code: every tool is a
//! declarative HTTP request template that the gateway fills from the call
//! arguments and sends to the tenant's upstream API.
//!
//! ## Request Flow
//!
//! ```text
//! HTTP request
//!   -> origin / protocol-version checks
//!   -> AuthLayer            (bearer token, multi-issuer JWKS validation)
//!   -> JsonRpcLayer         (envelope parsing, notifications)
//!   -> McpTracingLayer      (span per call)
//!   -> Dispatcher           (sessions, tools/list, tools/call)
//!   -> ExecutionEngine      (template rendering, egress allowlist, upstream call)
//! ```
//!
//! Every stage is an ordinary tower [`Service`](tower_service::Service) or
//! [`Layer`](tower::Layer), so the dispatcher can be driven without HTTP:
//!
//! ```rust
//! use std::sync::Arc;
//! use mcp_gateway::{
//!     CallContext, Dispatcher, ExecutionEngine, JsonRpcCall, JsonRpcLayer, MemoryStore,
//!     SessionManager, jsonrpc::parse_request,
//! };
//! use tower::{Layer, ServiceExt};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let dispatcher = Dispatcher::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SessionManager::new()),
//!     ExecutionEngine::new().unwrap(),
//! );
//! let service = JsonRpcLayer::new().layer(dispatcher);
//!
//! let request = parse_request(br#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#).unwrap();
//! let outcome = service
//!     .oneshot(JsonRpcCall { context: CallContext::new("unknown"), request })
//!     .await
//!     .unwrap();
//!
//! // No such server is configured
//! assert_eq!(outcome.error().unwrap().code, -32004);
//! # }
//! ```
//!
//! ## Running the Gateway
//!
//! The `mcp-gateway` binary reads a TOML file (see [`config`]) holding the
//! listener settings and the tenants, servers and tools to serve:
//!
//! ```text
//! mcp-gateway --config gateway.toml --log-level debug
//! ```

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod jsonrpc;
pub mod oauth;
pub mod protocol;
pub mod session;
pub mod store;
pub mod tracing_layer;
pub mod transport;

// Re-exports
pub use config::{ConfigError, GatewayConfig};
pub use dispatcher::{CallContext, DispatchRequest, DispatchResponse, Dispatcher};
pub use engine::{ExecutionEngine, ExecutionError, UpstreamResult};
pub use error::{BoxError, Error, ErrorCode, JsonRpcError, Result};
pub use jsonrpc::{JsonRpcCall, JsonRpcLayer, JsonRpcOutcome, JsonRpcService};
pub use protocol::{
    CallToolParams, CallToolResult, Content, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, McpRequest, McpResponse, RequestId, ToolDefinition,
};
pub use session::{Session, SessionError, SessionManager};
pub use store::{ConfigStore, MemoryStore, RequestTemplate, SeedData, Server, Tenant, Tool};
pub use tracing_layer::{McpTracingLayer, McpTracingService};
pub use transport::GatewayTransport;
