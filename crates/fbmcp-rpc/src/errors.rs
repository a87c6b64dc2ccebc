//! Standard JSON-RPC error codes and the typed handler error.

use serde_json::Value;

use crate::types::JsonRpcErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// Body was not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Request shape is malformed (wrong version, missing method).
pub const INVALID_REQUEST: i64 = -32600;
/// Method (or route) not found.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid params, including a missing or unknown session id.
pub const INVALID_PARAMS: i64 = -32602;
/// Unexpected internal error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Error type returned by dispatchers and the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Body was not valid JSON.
    #[error("{message}")]
    Parse {
        /// Description of the decode failure.
        message: String,
    },

    /// Request shape is malformed.
    #[error("{message}")]
    InvalidRequest {
        /// What is wrong with the shape.
        message: String,
    },

    /// Method is not known to the dispatcher.
    #[error("method '{method}' not found")]
    MethodNotFound {
        /// The unknown method name.
        method: String,
    },

    /// Required parameter missing or wrong type. Also covers session
    /// correlation failures (missing/unknown session id).
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Description; never leaked verbatim to clients by the transports.
        message: String,
    },

    /// Domain-specific error with an implementation-defined code.
    #[error("{message}")]
    Custom {
        /// Implementation-defined code (outside the reserved range).
        code: i64,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        data: Option<Value>,
    },
}

impl RpcError {
    /// Numeric JSON-RPC code for this variant.
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse { .. } => PARSE_ERROR,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Custom { code, .. } => *code,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> JsonRpcErrorBody {
        JsonRpcErrorBody {
            code: self.code(),
            message: self.to_string(),
            data: match self {
                Self::Custom { data, .. } => data.clone(),
                _ => None,
            },
        }
    }

    /// Invalid params shorthand.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Internal error shorthand.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
