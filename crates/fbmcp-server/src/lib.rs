//! # fbmcp-server
//!
//! Multi-transport session and connection core for an MCP-style JSON-RPC
//! server:
//!
//! - Session registry: keyed in-memory store with time-based expiry sweeping
//! - Byte-stream adapter: line-delimited JSON-RPC over stdin/stdout
//! - Event-stream adapter: legacy SSE stream + `/message` submission endpoint
//! - Bidirectional-HTTP adapter: `/mcp` with stateless and stateful modes
//! - Unified front door: one listener, auto-detection, health/introspection
//! - Graceful shutdown via `CancellationToken`
//!
//! Domain request handling stays behind `fbmcp_rpc::Dispatcher`; this crate
//! never interprets method names beyond the protocol's initialization shape.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use config::ServerConfig;
pub use server::{AppState, McpServer};
pub use session::registry::SessionRegistry;
pub use shutdown::ShutdownCoordinator;
