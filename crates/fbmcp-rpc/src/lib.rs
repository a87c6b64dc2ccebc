//! # fbmcp-rpc
//!
//! JSON-RPC 2.0 protocol layer shared by every transport:
//! - Wire types: request, response, error envelope
//! - Standard error codes (`-32700` … `-32603`) and a typed error
//! - The [`Dispatcher`] boundary behind which all domain logic lives
//! - A shared dispatch helper with handler timeout and notification handling
//!
//! The transports never interpret method names or payload semantics; they
//! decode a [`types::JsonRpcRequest`], hand it to a [`Dispatcher`], and
//! encode whatever comes back.

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod errors;
pub mod types;

pub use dispatcher::{dispatch_request, Dispatcher, DispatcherFactory, EventSink, NoopEventSink};
pub use errors::{
    RpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use types::{parse_request, JsonRpcErrorBody, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
