//! Session model: one logical client conversation pinned to one transport
//! instance.

pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use fbmcp_rpc::Dispatcher;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
// Follows the runtime's (possibly test-paused) clock.
use tokio::time::Instant;

/// The open connection/stream backing a session.
///
/// Owned exclusively by its [`Session`]; no other component holds a strong
/// reference, so the registry's remove/shutdown paths are the only places a
/// close can originate.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Push one server-to-client event. Non-blocking best-effort; `false`
    /// means the client is gone or slow and the event was dropped.
    fn send_event(&self, event: &Value) -> bool;

    /// Attach (or replace) a server-to-client event stream.
    ///
    /// Only meaningful for transports with a detachable notification
    /// channel (stateful `/mcp` GET); others keep the default refusal.
    fn attach_stream(&self, tx: mpsc::Sender<Event>) -> bool {
        let _ = tx;
        false
    }

    /// Close the underlying connection. Best-effort: callers swallow and
    /// log the error, never propagate it.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Optional metadata distinguishing sessions multiplexed through an
/// intermediary.
#[derive(Clone, Debug, Default)]
pub struct SessionMeta {
    /// Whether the session arrived through a forwarding proxy.
    pub proxied: bool,
    /// Intermediary-supplied correlation key, distinct from the session id.
    pub proxy_client_id: Option<String>,
}

/// Server-side record correlating one client conversation with one
/// transport instance, one dispatcher, and an activity timestamp.
pub struct Session {
    /// Unique session id; immutable once created.
    pub id: String,
    transport: Arc<dyn SessionTransport>,
    dispatcher: Arc<dyn Dispatcher>,
    /// When the session was registered.
    pub created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    /// Proxy metadata.
    pub meta: SessionMeta,
}

impl Session {
    /// Create a session with `created_at == last_activity == now`.
    pub fn new(
        id: String,
        transport: Arc<dyn SessionTransport>,
        dispatcher: Arc<dyn Dispatcher>,
        meta: SessionMeta,
    ) -> Self {
        Self {
            id,
            transport,
            dispatcher,
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            meta,
        }
    }

    /// Refresh `last_activity` to now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound or outbound message for this session.
    pub fn idle(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// The dispatcher pinned to this session.
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    /// The transport pinned to this session.
    pub fn transport(&self) -> &Arc<dyn SessionTransport> {
        &self.transport
    }

    /// Push an event to the client and count it as session activity.
    pub fn send_event(&self, event: &Value) -> bool {
        let sent = self.transport.send_event(event);
        if sent {
            self.touch();
        }
        sent
    }

    /// Debug/monitoring view of this session.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            created_at: self.created_at,
            idle_ms: u64::try_from(self.idle().as_millis()).unwrap_or(u64::MAX),
            proxied: self.meta.proxied,
            proxy_client_id: self.meta.proxy_client_id.clone(),
        }
    }

}

/// Serializable session summary for the `/sessions` debug endpoint.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session id.
    pub id: String,
    /// Registration time (RFC-3339).
    pub created_at: DateTime<Utc>,
    /// Milliseconds since the last activity.
    pub idle_ms: u64,
    /// Whether the session is proxied.
    pub proxied: bool,
    /// Proxy correlation key, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_client_id: Option<String>,
}
