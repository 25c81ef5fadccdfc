//! Error types for mcp-gateway

use serde::{Deserialize, Serialize};

/// JSON-RPC error codes used by the gateway.
///
/// The first five are the standard JSON-RPC 2.0 codes; the rest live in the
/// implementation-defined server error range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Invalid JSON was received
    ParseError = -32700,
    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,
    /// The upstream call could not be completed (egress denied, unreachable, timeout)
    UpstreamError = -32000,
    /// The named tool does not exist on the addressed server
    ToolNotFound = -32001,
    /// Valid token, but it does not carry the scopes the tool requires
    InsufficientScope = -32002,
    /// No authenticated claims are attached to the call
    Unauthorized = -32003,
    /// The addressed server (or its tenant) is absent or disabled
    ServerNotFound = -32004,
    /// A session-bound method was called without a session id
    MissingSession = -32005,
    /// The supplied session id is unknown, expired, or bound to another server
    SessionNotFound = -32006,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns true if this error carries the given code.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.code()
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamError, message)
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(ErrorCode::ToolNotFound, "tool not found")
            .with_data(serde_json::json!({ "tool": name }))
    }

    pub fn insufficient_scope(required: &[String]) -> Self {
        Self::new(ErrorCode::InsufficientScope, "insufficient_scope")
            .with_data(serde_json::json!({ "required": required }))
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "unauthorized")
    }

    pub fn server_not_found() -> Self {
        Self::new(ErrorCode::ServerNotFound, "server not found")
    }

    pub fn missing_session() -> Self {
        Self::new(ErrorCode::MissingSession, "missing session")
    }

    pub fn session_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SessionNotFound, message)
    }
}

/// mcp-gateway error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Type-erased error used at service boundaries
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for mcp-gateway
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_codes_are_distinct_from_standard_codes() {
        assert_eq!(ErrorCode::UpstreamError.code(), -32000);
        assert_eq!(ErrorCode::SessionNotFound.code(), -32006);
        assert_ne!(
            ErrorCode::InsufficientScope.code(),
            ErrorCode::Unauthorized.code()
        );
        assert_ne!(
            ErrorCode::MissingSession.code(),
            ErrorCode::SessionNotFound.code()
        );
    }

    #[test]
    fn test_insufficient_scope_carries_required_scopes() {
        let err = JsonRpcError::insufficient_scope(&["read:orders".to_string()]);
        assert!(err.is(ErrorCode::InsufficientScope));
        assert_eq!(err.message, "insufficient_scope");
        assert_eq!(err.data.unwrap()["required"][0], "read:orders");
    }

    #[test]
    fn test_serialization_skips_missing_data() {
        let json = serde_json::to_value(JsonRpcError::missing_session()).unwrap();
        assert_eq!(json["code"], -32005);
        assert!(json.get("data").is_none());
    }
}
