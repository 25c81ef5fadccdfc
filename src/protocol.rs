//! MCP protocol types based on JSON-RPC 2.0
//!
//! Only the slice of the protocol the gateway terminates is modelled here:
//! `initialize`, `tools/list`, `tools/call`, `terminate` and `ping`.
//! See <https://modelcontextprotocol.io/specification/2025-06-18>.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JsonRpcError;

/// The JSON-RPC version. MUST be "2.0".
pub const JSONRPC_VERSION: &str = "2.0";

/// The latest supported MCP protocol version.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// All supported MCP protocol versions (newest first).
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26"];

/// Method names understood by the dispatcher
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const TERMINATE: &str = "terminate";
    pub const PING: &str = "ping";
    /// Prefix shared by all client notifications
    pub const NOTIFICATION_PREFIX: &str = "notifications/";
}

/// JSON-RPC 2.0 request
///
/// The `id` is optional: callers may omit the correlation id, in which case
/// the response carries `"id": null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Validate that this request conforms to JSON-RPC 2.0.
    /// Returns an error if the jsonrpc version is not "2.0".
    pub fn validate(&self) -> Result<(), JsonRpcError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(JsonRpcError::invalid_request(format!(
                "Invalid JSON-RPC version: expected '{}', got '{}'",
                JSONRPC_VERSION, self.jsonrpc
            )));
        }
        if self.method.is_empty() {
            return Err(JsonRpcError::invalid_request("Missing method"));
        }
        Ok(())
    }

    /// Returns true for id-less `notifications/*` messages, which get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.starts_with(methods::NOTIFICATION_PREFIX)
    }
}

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResultResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub result: Value,
}

/// JSON-RPC 2.0 response (error)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

/// JSON-RPC 2.0 response (either success or error)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponse {
    Result(JsonRpcResultResponse),
    Error(JsonRpcErrorResponse),
}

impl JsonRpcResponse {
    pub fn result(id: Option<RequestId>, result: Value) -> Self {
        Self::Result(JsonRpcResultResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        })
    }

    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self::Error(JsonRpcErrorResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        })
    }

    /// Returns the error object, if this is an error response.
    pub fn as_error(&self) -> Option<&JsonRpcError> {
        match self {
            JsonRpcResponse::Error(e) => Some(&e.error),
            JsonRpcResponse::Result(_) => None,
        }
    }
}

/// Request ID - can be string or number per JSON-RPC spec
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<i32> for RequestId {
    fn from(n: i32) -> Self {
        RequestId::Number(n as i64)
    }
}

// =============================================================================
// MCP-specific request/response types
// =============================================================================

/// MCP request, parsed from the JSON-RPC method and params
#[derive(Debug, Clone)]
pub enum McpRequest {
    /// Open a session
    Initialize(InitializeParams),
    /// List the tools of the addressed server
    ListTools,
    /// Invoke a tool
    CallTool(CallToolParams),
    /// Close the current session
    Terminate,
    /// Keepalive
    Ping,
    /// Unknown method
    Unknown { method: String },
}

impl McpRequest {
    /// Get the method name for this request
    pub fn method_name(&self) -> &str {
        match self {
            McpRequest::Initialize(_) => methods::INITIALIZE,
            McpRequest::ListTools => methods::TOOLS_LIST,
            McpRequest::CallTool(_) => methods::TOOLS_CALL,
            McpRequest::Terminate => methods::TERMINATE,
            McpRequest::Ping => methods::PING,
            McpRequest::Unknown { method } => method,
        }
    }

    /// Parse an MCP request from its JSON-RPC envelope.
    ///
    /// Fails only when the params of a known method do not have the expected shape.
    pub fn from_jsonrpc(req: &JsonRpcRequest) -> Result<Self, crate::error::Error> {
        let params = req
            .params
            .clone()
            .unwrap_or(Value::Object(Default::default()));

        match req.method.as_str() {
            methods::INITIALIZE => {
                let p: InitializeParams = serde_json::from_value(params)?;
                Ok(McpRequest::Initialize(p))
            }
            methods::TOOLS_LIST => Ok(McpRequest::ListTools),
            methods::TOOLS_CALL => {
                let p: CallToolParams = serde_json::from_value(params)?;
                Ok(McpRequest::CallTool(p))
            }
            methods::TERMINATE => Ok(McpRequest::Terminate),
            methods::PING => Ok(McpRequest::Ping),
            method => Ok(McpRequest::Unknown {
                method: method.to_string(),
            }),
        }
    }
}

/// MCP response payloads, serialized as the JSON-RPC `result`
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum McpResponse {
    Initialize(InitializeResult),
    ListTools(ListToolsResult),
    CallTool(CallToolResult),
    Terminate(TerminateResult),
    Pong(EmptyResult),
}

// =============================================================================
// Initialize
// =============================================================================

/// `initialize` params. Every field is optional; the gateway only reads the
/// requested protocol version.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub client_info: Option<Implementation>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub list_changed: bool,
}

/// Pick the protocol version to answer `initialize` with: the client's
/// version when we support it, our latest otherwise.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

// =============================================================================
// Tools
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolDefinition>,
}

/// Tool definition as returned by tools/list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// `tools/call` params.
///
/// Accepts both the MCP field names (`name`, `arguments`) and the legacy
/// gateway names (`toolId`, `args`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallToolParams {
    #[serde(alias = "toolId")]
    pub name: String,
    #[serde(default, alias = "args")]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Upstream HTTP status code
    pub status: u16,
    /// Upstream body: JSON as received, or `{"text": ...}` for non-JSON payloads
    pub data: Value,
}

impl CallToolResult {
    /// Wrap an upstream response as a tool result.
    pub fn from_upstream(status: u16, data: Value) -> Self {
        let text = match &data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            content: vec![Content::Text { text }],
            is_error: status >= 400,
            structured_content: data.is_object().then(|| data.clone()),
            status,
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminateResult {
    pub terminated: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyResult {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_without_id_deserializes() {
        let req: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "tools/list"})).unwrap();
        assert!(req.id.is_none());
        assert!(req.validate().is_ok());
        assert!(!req.is_notification());
    }

    #[test]
    fn test_wrong_version_is_invalid_request() {
        let req: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"})).unwrap();
        let err = req.validate().unwrap_err();
        assert_eq!(err.code, -32600);
    }

    #[test]
    fn test_notification_detection() {
        let req: JsonRpcRequest = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_call_tool_params_accepts_legacy_names() {
        let p: CallToolParams =
            serde_json::from_value(json!({"toolId": "getOrder", "args": {"orderId": "abc"}}))
                .unwrap();
        assert_eq!(p.name, "getOrder");
        assert_eq!(p.arguments["orderId"], "abc");

        let p: CallToolParams = serde_json::from_value(json!({"name": "getOrder"})).unwrap();
        assert!(p.arguments.is_null());
    }

    #[test]
    fn test_from_jsonrpc_rejects_malformed_call_params() {
        let req = JsonRpcRequest::new(1, "tools/call").with_params(json!({"arguments": {}}));
        assert!(McpRequest::from_jsonrpc(&req).is_err());
    }

    #[test]
    fn test_unknown_method_is_preserved() {
        let req = JsonRpcRequest::new(1, "resources/list");
        let parsed = McpRequest::from_jsonrpc(&req).unwrap();
        assert_eq!(parsed.method_name(), "resources/list");
    }

    #[test]
    fn test_negotiate_protocol_version() {
        assert_eq!(negotiate_protocol_version(Some("2025-03-26")), "2025-03-26");
        assert_eq!(
            negotiate_protocol_version(Some("1999-01-01")),
            LATEST_PROTOCOL_VERSION
        );
        assert_eq!(negotiate_protocol_version(None), LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn test_call_tool_result_from_upstream() {
        let result = CallToolResult::from_upstream(200, json!({"id": "abc"}));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], 200);
        assert_eq!(json["data"]["id"], "abc");
        assert_eq!(json["structuredContent"]["id"], "abc");
        assert_eq!(json["content"][0]["type"], "text");
        assert!(json.get("isError").is_none());

        let failed = CallToolResult::from_upstream(502, json!({"text": "bad gateway"}));
        assert!(failed.is_error);
    }

    #[test]
    fn test_response_id_serializes_as_null_when_absent() {
        let resp = JsonRpcResponse::result(None, json!({}));
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["id"].is_null());
        assert_eq!(json["jsonrpc"], "2.0");
    }
}
