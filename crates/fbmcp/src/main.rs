//! # fbmcp
//!
//! MCP server binary — wires the core dispatcher into the transport
//! front door and runs until interrupted.

#![deny(unsafe_code)]

mod core;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use fbmcp_server::{McpServer, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::core::CoreDispatcherFactory;

/// Which transports to serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Newline-delimited JSON-RPC over stdin/stdout.
    Stdio,
    /// HTTP front door (SSE + `/mcp`).
    Http,
    /// Both at once.
    Both,
}

/// MCP server over stdio, SSE and streamable HTTP.
#[derive(Parser, Debug)]
#[command(name = "fbmcp", about = "MCP server over stdio, SSE and streamable HTTP")]
struct Cli {
    /// Transport(s) to serve.
    #[arg(long, value_enum, default_value = "http")]
    transport: Transport,

    /// Host to bind (overrides MCP_FIREBIRD_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides MCP_FIREBIRD_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Run `/mcp` in stateful (session-pinned) mode.
    #[arg(long)]
    stateful: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // stdout belongs to the stdio transport; all logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let mut config = ServerConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.stateful {
        config.stateless = false;
    }

    let server = McpServer::new(config, Arc::new(CoreDispatcherFactory));

    if matches!(args.transport, Transport::Stdio | Transport::Both) {
        server.spawn_stdio();
    }
    if matches!(args.transport, Transport::Http | Transport::Both) {
        let addr = server.listen().await?;
        info!(%addr, "serving http transports");
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    server.stop().await;
    Ok(())
}
