//! Health and introspection response types.

use serde::Serialize;
use serde_json::{json, Value};
use std::time::Instant;

/// Body of the `/health` endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
    /// `"stateless"` or `"stateful"`, per the `/mcp` transport mode.
    pub mode: &'static str,
    /// Live session count, or `"n/a"` in stateless mode where no
    /// registry entries are ever created by `/mcp`.
    pub sessions: Value,
    /// Seconds since the front door started.
    pub uptime_secs: u64,
}

impl HealthResponse {
    /// Assemble the health body for the current mode and session count.
    pub fn new(stateless: bool, session_count: usize, started_at: Instant) -> Self {
        Self {
            status: "ok",
            mode: if stateless { "stateless" } else { "stateful" },
            sessions: if stateless {
                json!("n/a")
            } else {
                json!(session_count)
            },
            uptime_secs: started_at.elapsed().as_secs(),
        }
    }
}
