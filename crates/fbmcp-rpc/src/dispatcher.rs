//! The dispatcher boundary and shared dispatch plumbing.
//!
//! Domain logic (query execution, schema introspection, backup/restore,
//! policy checks) lives entirely behind [`Dispatcher`]. The transports
//! treat dispatch as an opaque asynchronous unit of work.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::errors::{self, RpcError};
use crate::types::{JsonRpcRequest, JsonRpcResponse};

/// Maximum time a single dispatch is allowed to run.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Executes one decoded request and produces a result or a typed error.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Execute the request's method with its params.
    async fn dispatch(&self, request: JsonRpcRequest) -> Result<Value, RpcError>;
}

/// Outlet for server-to-client notifications, bound to one transport
/// instance (an SSE stream, or the stateful `/mcp` GET channel).
///
/// `send` is non-blocking best-effort; a `false` return means the client
/// is gone or slow and the event was dropped.
pub trait EventSink: Send + Sync {
    /// Push one JSON message to the client. Never blocks.
    fn send(&self, event: &Value) -> bool;
}

/// Sink that drops everything; used by per-request (stateless) pairs,
/// which have no server-to-client channel.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn send(&self, _event: &Value) -> bool {
        false
    }
}

/// Creates one dispatcher per transport instance.
///
/// Stateless HTTP calls this per request; the session-pinned transports
/// call it once per session, handing over that session's event sink.
pub trait DispatcherFactory: Send + Sync {
    /// Build a fresh dispatcher wired to `events`.
    fn create(&self, events: Arc<dyn EventSink>) -> Arc<dyn Dispatcher>;
}

/// Run one request through a dispatcher and build the wire response.
///
/// Returns `None` for notifications (no response expected on the wire);
/// their errors are logged and swallowed. Internal failures and timeouts
/// surface as `-32603` with a generic message — internal detail stays in
/// the logs.
pub async fn dispatch_request(
    dispatcher: &dyn Dispatcher,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    let method = request.method.clone();

    if request.is_notification() {
        if let Err(err) = tokio::time::timeout(DISPATCH_TIMEOUT, dispatcher.dispatch(request))
            .await
            .unwrap_or_else(|_| {
                Err(RpcError::internal(format!(
                    "notification '{method}' timed out"
                )))
            })
        {
            warn!(method = %method, error = %err, "notification dispatch failed");
        }
        return None;
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    let outcome = tokio::time::timeout(DISPATCH_TIMEOUT, dispatcher.dispatch(request)).await;

    let response = match outcome {
        Ok(Ok(result)) => JsonRpcResponse::success(id, result),
        Ok(Err(err @ RpcError::Internal { .. })) => {
            error!(method = %method, error = %err, "dispatch failed");
            JsonRpcResponse::error(id, errors::INTERNAL_ERROR, "internal error")
        }
        Ok(Err(err)) => JsonRpcResponse::from_rpc_error(id, &err),
        Err(_elapsed) => {
            error!(method = %method, "dispatch timed out after {DISPATCH_TIMEOUT:?}");
            JsonRpcResponse::error(
                id,
                errors::INTERNAL_ERROR,
                format!("handler for '{method}' timed out"),
            )
        }
    };
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoDispatcher;

    #[async_trait]
    impl Dispatcher for EchoDispatcher {
        async fn dispatch(&self, request: JsonRpcRequest) -> Result<Value, RpcError> {
            Ok(request.params.unwrap_or(Value::Null))
        }
    }

    struct FailDispatcher;

    #[async_trait]
    impl Dispatcher for FailDispatcher {
        async fn dispatch(&self, _request: JsonRpcRequest) -> Result<Value, RpcError> {
            Err(RpcError::internal("boom"))
        }
    }

    struct NotFoundDispatcher;

    #[async_trait]
    impl Dispatcher for NotFoundDispatcher {
        async fn dispatch(&self, request: JsonRpcRequest) -> Result<Value, RpcError> {
            Err(RpcError::MethodNotFound {
                method: request.method,
            })
        }
    }

    fn make_request(id: Option<Value>, method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }

    #[tokio::test]
    async fn dispatch_success_echoes_id() {
        let resp = dispatch_request(
            &EchoDispatcher,
            make_request(Some(json!(1)), "ping", Some(json!({"x": 1}))),
        )
        .await
        .unwrap();
        assert_eq!(resp.id, json!(1));
        assert_eq!(resp.result.unwrap()["x"], 1);
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn dispatch_internal_error_is_sanitized() {
        let resp = dispatch_request(&FailDispatcher, make_request(Some(json!(2)), "q", None))
            .await
            .unwrap();
        let body = resp.error.unwrap();
        assert_eq!(body.code, errors::INTERNAL_ERROR);
        // The "boom" detail must not leak to the client.
        assert_eq!(body.message, "internal error");
    }

    #[tokio::test]
    async fn dispatch_method_not_found_passes_through() {
        let resp = dispatch_request(
            &NotFoundDispatcher,
            make_request(Some(json!(3)), "no.such", None),
        )
        .await
        .unwrap();
        let body = resp.error.unwrap();
        assert_eq!(body.code, errors::METHOD_NOT_FOUND);
        assert!(body.message.contains("no.such"));
    }

    #[tokio::test]
    async fn notification_yields_no_response() {
        let resp = dispatch_request(&EchoDispatcher, make_request(None, "note", None)).await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn failing_notification_is_swallowed() {
        let resp = dispatch_request(&FailDispatcher, make_request(None, "note", None)).await;
        assert!(resp.is_none());
    }

    #[test]
    fn noop_sink_drops_events() {
        assert!(!NoopEventSink.send(&json!({"x": 1})));
    }

    struct SlowDispatcher;

    #[async_trait]
    impl Dispatcher for SlowDispatcher {
        async fn dispatch(&self, _request: JsonRpcRequest) -> Result<Value, RpcError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_times_out() {
        let resp = dispatch_request(&SlowDispatcher, make_request(Some(json!(4)), "slow", None))
            .await
            .unwrap();
        let body = resp.error.unwrap();
        assert_eq!(body.code, errors::INTERNAL_ERROR);
        assert!(body.message.contains("timed out"));
    }
}
