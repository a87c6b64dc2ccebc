//! Server configuration with `MCP_FIREBIRD_*` environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the server front door.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Interface to bind HTTP transports to.
    pub host: String,
    /// TCP port for the HTTP transports.
    pub port: u16,
    /// Whether `/mcp` runs stateless (per-request dispatcher, no session).
    pub stateless: bool,
    /// Inactivity window after which a session is swept, in seconds.
    pub session_timeout_secs: u64,
    /// How often the registry sweeps for expired sessions, in seconds.
    pub sweep_interval_secs: u64,
    /// Maximum accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3003,
            stateless: true,
            session_timeout_secs: 1800,
            sweep_interval_secs: 60,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Defaults merged with any `MCP_FIREBIRD_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        apply_env_overrides(&mut config);
        config
    }

    /// Socket address string for the HTTP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Session inactivity timeout as a [`Duration`].
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Apply environment variable overrides to a loaded config.
///
/// Each env var has strict parsing rules:
/// - Integers must be valid and within the accepted range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (defaults win)
pub fn apply_env_overrides(config: &mut ServerConfig) {
    if let Some(v) = read_env_string("MCP_FIREBIRD_HOST") {
        config.host = v;
    }
    if let Some(v) = read_env_u16("MCP_FIREBIRD_PORT", 1, 65535) {
        config.port = v;
    }
    if let Some(v) = read_env_bool("MCP_FIREBIRD_STATELESS") {
        config.stateless = v;
    }
    if let Some(v) = read_env_u64("MCP_FIREBIRD_SESSION_TIMEOUT_SECS", 1, 86_400) {
        config.session_timeout_secs = v;
    }
    if let Some(v) = read_env_u64("MCP_FIREBIRD_SWEEP_INTERVAL_SECS", 1, 3600) {
        config.sweep_interval_secs = v;
    }
    if let Some(v) = read_env_usize("MCP_FIREBIRD_MAX_BODY_BYTES", 1024, 64 * 1024 * 1024) {
        config.max_body_bytes = v;
    }
}

// ── Value parsers ───────────────────────────────────────────────────────────

/// Parse a string as a boolean. Accepts multiple common formats.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ────────────────────────────────────────────────────

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3003);
        assert!(config.stateless);
        assert_eq!(config.session_timeout_secs, 1800);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.max_body_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let config = ServerConfig {
            host: "0.0.0.0".into(),
            port: 8080,
            ..ServerConfig::default()
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn duration_accessors() {
        let config = ServerConfig::default();
        assert_eq!(config.session_timeout(), Duration::from_secs(1800));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
    }

    // ── Serde ───────────────────────────────────────────────────────

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"port": 4000, "stateless": false}"#).unwrap();
        assert_eq!(config.port, 4000);
        assert!(!config.stateless);
        assert_eq!(config.host, "127.0.0.1");
    }

    // ── Boolean parsing ─────────────────────────────────────────────

    #[test]
    fn parse_bool_accepts_common_forms() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "FALSE", "0", "no", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
    }

    #[test]
    fn parse_bool_rejects_garbage() {
        assert_eq!(parse_bool(""), None);
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool("2"), None);
    }

    // ── Range parsing ───────────────────────────────────────────────

    #[test]
    fn parse_u16_range_bounds() {
        assert_eq!(parse_u16_range("3003", 1, 65535), Some(3003));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("port", 1, 65535), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("1800", 1, 86_400), Some(1800));
        assert_eq!(parse_u64_range("90000", 1, 86_400), None);
        assert_eq!(parse_u64_range("-1", 1, 86_400), None);
    }

    #[test]
    fn parse_usize_range_bounds() {
        assert_eq!(parse_usize_range("4096", 1024, 1 << 26), Some(4096));
        assert_eq!(parse_usize_range("100", 1024, 1 << 26), None);
    }

    // ── Env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply_and_ignore_invalid() {
        // Process-global env, so everything lives in one test.
        std::env::set_var("MCP_FIREBIRD_PORT", "4100");
        std::env::set_var("MCP_FIREBIRD_STATELESS", "off");
        std::env::set_var("MCP_FIREBIRD_SESSION_TIMEOUT_SECS", "not-a-number");

        let mut config = ServerConfig::default();
        apply_env_overrides(&mut config);

        assert_eq!(config.port, 4100);
        assert!(!config.stateless);
        assert_eq!(config.session_timeout_secs, 1800);

        std::env::remove_var("MCP_FIREBIRD_PORT");
        std::env::remove_var("MCP_FIREBIRD_STATELESS");
        std::env::remove_var("MCP_FIREBIRD_SESSION_TIMEOUT_SECS");
    }
}
