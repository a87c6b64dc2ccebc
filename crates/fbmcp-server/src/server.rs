//! `McpServer` — the unified front door over every transport.
//!
//! Mounts the event-stream and bidirectional HTTP adapters behind one
//! listener, adds CORS, body limits and request tracing, and handles
//! protocol auto-detection at the root path. `stop` cascades adapter
//! cleanup into the registry's shutdown before the listener closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use fbmcp_rpc::{DispatcherFactory, JsonRpcResponse, INVALID_REQUEST, METHOD_NOT_FOUND};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::HealthResponse;
use crate::session::registry::SessionRegistry;
use crate::session::SessionInfo;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::sse::{post_message, sse_open, SseQuery};
use crate::transport::stdio::run_stdio;
use crate::transport::streamable::{mcp_delete, mcp_get, mcp_post};
use crate::transport::{PROXY_CLIENT_ID_HEADER, PROXY_FLAG_HEADER, SESSION_ID_HEADER};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration, fixed at startup.
    pub config: Arc<ServerConfig>,
    /// The session registry shared by every stateful adapter.
    pub registry: Arc<SessionRegistry>,
    /// Builds one dispatcher per session or per stateless exchange.
    pub factory: Arc<dyn DispatcherFactory>,
    /// When the front door started.
    pub started_at: Instant,
}

/// The unified front door.
pub struct McpServer {
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
}

impl McpServer {
    /// Create a front door; nothing listens until [`McpServer::listen`].
    pub fn new(config: ServerConfig, factory: Arc<dyn DispatcherFactory>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session_timeout()));
        Self {
            state: AppState {
                config: Arc::new(config),
                registry,
                factory,
                started_at: Instant::now(),
            },
            shutdown: Arc::new(ShutdownCoordinator::new()),
        }
    }

    /// Build the Axum router with all routes and cross-cutting layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_get).post(root_post))
            .route("/sse", get(sse_open))
            .route("/message", axum::routing::post(post_message))
            .route("/mcp", axum::routing::post(mcp_post).get(mcp_get).delete(mcp_delete))
            .route("/health", get(health_handler))
            .route("/sessions", get(sessions_handler))
            .route("/proxy-support", get(proxy_support_handler))
            .fallback(not_found)
            .layer(DefaultBodyLimit::max(self.state.config.max_body_bytes))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the HTTP listener, start the sweep task, and serve in the
    /// background. Returns the bound address (useful with port 0).
    pub async fn listen(&self) -> Result<SocketAddr> {
        self.state
            .registry
            .spawn_sweeper(self.state.config.sweep_interval());

        let listener = tokio::net::TcpListener::bind(self.state.config.bind_addr())
            .await
            .with_context(|| format!("failed to bind {}", self.state.config.bind_addr()))?;
        let addr = listener.local_addr().context("listener local_addr")?;

        let app = self.router();
        let token = self.shutdown.token();
        self.shutdown.track(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(token.cancelled_owned());
            if let Err(err) = serve.await {
                error!(error = %err, "http server exited with error");
            }
        }));

        info!(%addr, mode = if self.state.config.stateless { "stateless" } else { "stateful" }, "front door listening");
        Ok(addr)
    }

    /// Serve the byte-stream transport over stdio in the background.
    pub fn spawn_stdio(&self) {
        let factory = Arc::clone(&self.state.factory);
        let token = self.shutdown.token();
        self.shutdown.track(tokio::spawn(async move {
            if let Err(err) = run_stdio(factory, token).await {
                error!(error = %err, "stdio transport exited with error");
            }
        }));
    }

    /// Stop everything: close every session through the registry, then
    /// signal the transports and wait for the listener to drain.
    pub async fn stop(&self) {
        info!("front door stopping");
        self.state.registry.shutdown().await;
        self.shutdown.drain(None).await;
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET `/`: auto-detect. Streaming-capable clients (per `Accept`) get the
/// event stream; everyone else gets the introspection document.
async fn root_get(
    state: State<AppState>,
    query: Query<SseQuery>,
    headers: HeaderMap,
) -> Response {
    if wants_event_stream(&headers) {
        return sse_open(state, query, headers).await;
    }
    introspection(&state.0).into_response()
}

/// POST `/`: auto-detect. JSON posts are treated as `/mcp` traffic.
async fn root_post(state: State<AppState>, headers: HeaderMap, body: String) -> Response {
    if is_json_post(&headers) {
        return mcp_post(state, headers, body).await;
    }
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcResponse::error_without_id(
            INVALID_REQUEST,
            "cannot auto-detect transport: use /sse or POST JSON to /mcp",
        )),
    )
        .into_response()
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

fn is_json_post(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

/// Introspection document listing enabled protocols and their paths.
fn introspection(state: &AppState) -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "mode": if state.config.stateless { "stateless" } else { "stateful" },
        "transports": {
            "eventStream": { "open": "/sse", "message": "/message" },
            "http": { "endpoint": "/mcp" },
        },
    }))
}

/// GET `/health`
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.registry.count().await;
    Json(HealthResponse::new(
        state.config.stateless,
        sessions,
        state.started_at,
    ))
}

/// GET `/sessions` — debug listing of active sessions.
async fn sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.infos().await)
}

/// GET `/proxy-support` — capability advertisement for intermediaries.
async fn proxy_support_handler() -> Json<serde_json::Value> {
    Json(json!({
        "proxySupport": true,
        "sessionHeader": SESSION_ID_HEADER,
        "proxyHeaders": [PROXY_FLAG_HEADER, PROXY_CLIENT_ID_HEADER],
        "transports": ["sse", "http"],
    }))
}

/// Fallback: unknown routes still answer with the standard envelope.
async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(JsonRpcResponse::error_without_id(
            METHOD_NOT_FOUND,
            "route not found",
        )),
    )
        .into_response()
}
