//! JSON-RPC 2.0 wire-format types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{self, RpcError};

/// The only protocol version this server speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Incoming JSON-RPC request (or notification, when `id` is absent).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version; must be `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier. Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name (e.g. `initialize`, `tools/call`).
    pub method: String,
    /// Optional parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outgoing JSON-RPC response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoed request identifier (`null` for request-independent errors).
    pub id: Value,
    /// Result payload (success only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (failure only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorBody>,
}

/// Structured error inside a [`JsonRpcResponse`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcErrorBody {
    /// Standard JSON-RPC error code (e.g. `-32601`).
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcRequest {
    /// Whether this is a notification (no response expected).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Whether this request matches the protocol's initialization shape.
    pub fn is_initialize(&self) -> bool {
        self.method == "initialize"
    }

    /// Validate the request shape, independent of any method semantics.
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(RpcError::InvalidRequest {
                message: format!("unsupported jsonrpc version '{}'", self.jsonrpc),
            });
        }
        if self.method.is_empty() {
            return Err(RpcError::InvalidRequest {
                message: "missing method".into(),
            });
        }
        Ok(())
    }
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response from a numeric code and a message.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(JsonRpcErrorBody {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Build an error response from a typed [`RpcError`].
    pub fn from_rpc_error(id: Value, err: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(err.to_error_body()),
        }
    }

    /// Error response with `id: null`, for failures before an id is known
    /// (parse errors, route errors).
    pub fn error_without_id(code: i64, message: impl Into<String>) -> Self {
        Self::error(Value::Null, code, message)
    }
}

/// Decode a raw body into a request, mapping failures onto the standard
/// parse / invalid-request codes.
pub fn parse_request(raw: &str) -> Result<JsonRpcRequest, RpcError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| RpcError::Parse {
        message: format!("invalid JSON: {e}"),
    })?;
    let request: JsonRpcRequest =
        serde_json::from_value(value).map_err(|e| RpcError::InvalidRequest {
            message: format!("malformed request: {e}"),
        })?;
    request.validate()?;
    Ok(request)
}
