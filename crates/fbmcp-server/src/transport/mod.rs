//! Transport adapters bridging the wire to the request dispatcher.
//!
//! Three adapters share one dispatcher seam: a byte-stream adapter over
//! stdio, a legacy event-stream adapter (SSE plus `/message` submission),
//! and a bidirectional HTTP adapter at `/mcp` with stateless and stateful
//! modes.

pub mod sse;
pub mod stdio;
pub mod streamable;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use fbmcp_rpc::{JsonRpcResponse, RpcError};
use serde_json::Value;

use crate::session::SessionMeta;

/// Session correlation header for the stateful `/mcp` transport.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";
/// Flag header marking requests relayed through a forwarding proxy.
pub const PROXY_FLAG_HEADER: &str = "x-mcp-proxy";
/// Intermediary-supplied correlation key, distinct from the session id.
pub const PROXY_CLIENT_ID_HEADER: &str = "x-mcp-client-id";

/// Standard error envelope with a null request id.
pub(crate) fn error_response(status: StatusCode, err: &RpcError) -> Response {
    error_response_with_id(status, err, Value::Null)
}

/// Standard error envelope echoing the failed request's id.
pub(crate) fn error_response_with_id(status: StatusCode, err: &RpcError, id: Value) -> Response {
    (status, Json(JsonRpcResponse::from_rpc_error(id, err))).into_response()
}

/// Read a header as UTF-8, treating non-UTF-8 values as absent.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// Derive proxy metadata from the proxy flag and client-id headers.
pub(crate) fn session_meta_from_headers(headers: &HeaderMap) -> SessionMeta {
    let proxy_client_id = header_str(headers, PROXY_CLIENT_ID_HEADER).map(str::to_string);
    let proxied = proxy_client_id.is_some()
        || header_str(headers, PROXY_FLAG_HEADER)
            .is_some_and(|v| crate::config::parse_bool(v).unwrap_or(false));
    SessionMeta {
        proxied,
        proxy_client_id,
    }
}
