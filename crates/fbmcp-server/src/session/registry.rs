//! In-memory session registry with time-based expiry sweeping.
//!
//! The registry's map is the only shared mutable state in this subsystem.
//! All four removal paths (client disconnect, explicit termination, sweep
//! timeout, server shutdown) converge here, and removal transfers ownership
//! of the session out of the map, so each transport is closed at most once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fbmcp_rpc::Dispatcher;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Session, SessionInfo, SessionMeta, SessionTransport};

/// Delay between removal and transport close, so a response still being
/// flushed is not cut off mid-write.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<Session>>,
    /// Secondary index: proxy client id → session id.
    by_proxy: HashMap<String, String>,
}

impl Inner {
    /// Remove a session and its proxy mapping, returning it for closing.
    fn detach(&mut self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.remove(id)?;
        if let Some(proxy_id) = session.meta.proxy_client_id.as_deref() {
            if self.by_proxy.get(proxy_id).is_some_and(|sid| sid == id) {
                let _ = self.by_proxy.remove(proxy_id);
            }
        }
        Some(session)
    }
}

/// Keyed store of active sessions for the process lifetime.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    timeout: Duration,
    sweeper: parking_lot::Mutex<Option<CancellationToken>>,
}

impl SessionRegistry {
    /// Create a registry with the given inactivity timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            timeout,
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    /// Insert (or overwrite) the session for `id`.
    ///
    /// On id collision the prior entry is replaced and its transport is
    /// closed best-effort; the registry is the sole owner of transports,
    /// so an overwritten entry would otherwise never be closed.
    pub async fn create(
        &self,
        id: String,
        transport: Arc<dyn SessionTransport>,
        dispatcher: Arc<dyn Dispatcher>,
        meta: SessionMeta,
    ) -> Arc<Session> {
        let proxy_client_id = meta.proxy_client_id.clone();
        let session = Arc::new(Session::new(id.clone(), transport, dispatcher, meta));

        let prior = {
            let mut inner = self.inner.write().await;
            let prior = inner.detach(&id);
            let _ = inner.sessions.insert(id.clone(), session.clone());
            if let Some(proxy_id) = proxy_client_id {
                let _ = inner.by_proxy.insert(proxy_id, id.clone());
            }
            prior
        };
        if let Some(prior) = prior {
            warn!(session_id = %id, "session id collision, replacing prior entry");
            spawn_close(prior, "replaced");
        }

        debug!(session_id = %id, "session registered");
        session
    }

    /// Look up by id, refreshing `last_activity` (read-through keep-alive).
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.inner.read().await.sessions.get(id).cloned()?;
        session.touch();
        Some(session)
    }

    /// Look up by proxy client id; used when an intermediary supplies its
    /// own correlation key instead of the session id.
    pub async fn get_by_proxy_client_id(&self, proxy_client_id: &str) -> Option<Arc<Session>> {
        let session = {
            let inner = self.inner.read().await;
            let id = inner.by_proxy.get(proxy_client_id)?;
            inner.sessions.get(id).cloned()?
        };
        session.touch();
        Some(session)
    }

    /// Remove the session for `id`. Idempotent; returns whether an entry
    /// was removed. The transport close runs asynchronously after a short
    /// grace delay and any close error is swallowed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.inner.write().await.detach(id);
        match removed {
            Some(session) => {
                debug!(session_id = %id, "session removed");
                spawn_close(session, "removed");
                true
            }
            None => false,
        }
    }

    /// Remove every session inactive for longer than the timeout.
    ///
    /// Candidate ids are snapshotted first, then removed under the write
    /// lock with the expiry re-checked, so a concurrent removal or
    /// keep-alive between the two phases stays benign.
    pub async fn sweep(&self) -> usize {
        let candidates: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .sessions
                .values()
                .filter(|s| s.idle() > self.timeout)
                .map(|s| s.id.clone())
                .collect()
        };
        if candidates.is_empty() {
            return 0;
        }

        let mut expired = Vec::new();
        {
            let mut inner = self.inner.write().await;
            for id in &candidates {
                let still_expired = inner
                    .sessions
                    .get(id)
                    .is_some_and(|s| s.idle() > self.timeout);
                if still_expired {
                    if let Some(session) = inner.detach(id) {
                        expired.push(session);
                    }
                }
            }
        }

        let removed = expired.len();
        for session in expired {
            info!(session_id = %session.id, idle = ?session.idle(), "session expired");
            spawn_close(session, "expired");
        }
        removed
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// All live sessions.
    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.inner.read().await.sessions.values().cloned().collect()
    }

    /// Monitoring view of all live sessions.
    pub async fn infos(&self) -> Vec<SessionInfo> {
        self.inner
            .read()
            .await
            .sessions
            .values()
            .map(|s| s.info())
            .collect()
    }

    /// Start the periodic sweep task, the only background activity owned
    /// by the registry. Stopped by [`SessionRegistry::shutdown`].
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let token = CancellationToken::new();
        *self.sweeper.lock() = Some(token.clone());

        let registry = Arc::clone(self);
        drop(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            // Skip the immediate first tick
            let _ = tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let removed = registry.sweep().await;
                        if removed > 0 {
                            info!(removed, "sweep removed inactive sessions");
                        }
                    }
                    () = token.cancelled() => break,
                }
            }
        }));
    }

    /// Stop the sweep task and remove every session, closing each
    /// transport exactly once. Called once during graceful shutdown.
    pub async fn shutdown(&self) {
        if let Some(token) = self.sweeper.lock().take() {
            token.cancel();
        }

        let drained: Vec<Arc<Session>> = {
            let mut inner = self.inner.write().await;
            inner.by_proxy.clear();
            inner.sessions.drain().map(|(_, s)| s).collect()
        };

        let closed = drained.len();
        for session in drained {
            if let Err(err) = session.transport().close().await {
                warn!(session_id = %session.id, error = %err, "transport close failed during shutdown");
            }
        }
        info!(closed, "session registry shut down");
    }
}

/// Close a detached session's transport after the grace delay, swallowing
/// any error. Runs off the caller's path so resource release never throws
/// into request handling.
fn spawn_close(session: Arc<Session>, reason: &'static str) {
    drop(tokio::spawn(async move {
        tokio::time::sleep(CLOSE_GRACE).await;
        if let Err(err) = session.transport().close().await {
            warn!(session_id = %session.id, reason, error = %err, "transport close failed");
        }
    }));
}
