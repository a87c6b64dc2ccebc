//! Core dispatcher: the domain-side collaborator behind the transports.
//!
//! Handles the protocol-level methods every client needs (`initialize`,
//! `ping`, `server.info`); domain handlers register on top of this.

use std::sync::Arc;

use async_trait::async_trait;
use fbmcp_rpc::{Dispatcher, DispatcherFactory, EventSink, JsonRpcRequest, RpcError};
use serde_json::{json, Value};
use tracing::debug;

/// Protocol revision advertised during `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Builds one [`CoreDispatcher`] per session or stateless exchange.
pub struct CoreDispatcherFactory;

impl DispatcherFactory for CoreDispatcherFactory {
    fn create(&self, events: Arc<dyn EventSink>) -> Arc<dyn Dispatcher> {
        Arc::new(CoreDispatcher { events })
    }
}

/// One dispatcher instance, wired to its session's event sink.
pub struct CoreDispatcher {
    events: Arc<dyn EventSink>,
}

#[async_trait]
impl Dispatcher for CoreDispatcher {
    async fn dispatch(&self, request: JsonRpcRequest) -> Result<Value, RpcError> {
        debug!(method = %request.method, "dispatching");
        match request.method.as_str() {
            "initialize" => {
                let _ = self.events.send(&json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/initialized",
                }));
                Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {},
                }))
            }
            "ping" => Ok(json!({})),
            "server.info" => Ok(json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            })),
            other => Err(RpcError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbmcp_rpc::NoopEventSink;

    fn request(method: &str) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            method: method.into(),
            params: None,
        }
    }

    fn dispatcher() -> Arc<dyn Dispatcher> {
        CoreDispatcherFactory.create(Arc::new(NoopEventSink))
    }

    #[tokio::test]
    async fn initialize_reports_protocol_version() {
        let result = dispatcher().dispatch(request("initialize")).await.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["serverInfo"]["name"].is_string());
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let result = dispatcher().dispatch(request("ping")).await.unwrap();
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let err = dispatcher().dispatch(request("nope")).await.unwrap_err();
        assert_eq!(err.code(), fbmcp_rpc::METHOD_NOT_FOUND);
    }
}
