//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time to wait for tracked tasks before giving up on them.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Fans one stop signal out to every long-lived server task.
///
/// Transports watch the token to stop accepting work; the coordinator then
/// waits for the tasks it tracks to drain. Stopping is one-way: a stopped
/// server is never restarted.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no tracked tasks.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a long-lived task so `drain` waits for it.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Whether a stop has been initiated.
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal every token holder to stop, then wait up to `timeout`
    /// (default 10s) for the tracked tasks to finish. Idempotent; a
    /// second call finds nothing left to drain.
    pub async fn drain(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.token.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        if handles.is_empty() {
            return;
        }
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for server tasks to stop"
        );

        let joined = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, joined).await.is_err() {
            warn!("shutdown drain timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_stopping() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_stopping());
    }

    #[test]
    fn all_tokens_observe_cancel() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.token.cancel();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        assert!(coord.is_stopping());
    }

    #[tokio::test]
    async fn drain_awaits_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.track(tokio::spawn(async move {
            token.cancelled().await;
        }));

        coord.drain(None).await;
        assert!(coord.is_stopping());
    }

    #[tokio::test]
    async fn drain_times_out_on_stuck_task() {
        let coord = ShutdownCoordinator::new();
        // Ignores cancellation entirely.
        coord.track(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }));

        coord.drain(Some(Duration::from_millis(50))).await;
        assert!(coord.is_stopping());
    }

    #[tokio::test]
    async fn drain_twice_is_idempotent() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.track(tokio::spawn(async move {
            token.cancelled().await;
        }));

        coord.drain(None).await;
        coord.drain(None).await;
        assert!(coord.is_stopping());
    }
}
