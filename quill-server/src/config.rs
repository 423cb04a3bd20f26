//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use quill_core::StreamPolicy;

/// Runtime configuration for quill-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Number of concurrent conversion slots in the worker pool.
    pub worker_count: usize,

    /// Path to (or name of) the pandoc executable.
    pub pandoc_path: String,

    /// Seconds between heartbeats on `/v1/convert/stream`.
    pub heartbeat_interval_secs: u64,

    /// Seconds of heartbeat-only activity before `/v1/convert/stream` gives up.
    pub inactivity_timeout_secs: u64,

    /// Hard deadline for the tool-protocol stream on `/v1/sse`.
    pub mcp_timeout_secs: u64,

    /// Comma-separated CORS origin allow-list; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI at `/swagger-ui`.
    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("QUILL_BIND", "0.0.0.0:3000"),
            log_level: env_or("QUILL_LOG", "info"),
            log_json: parse_bool("QUILL_LOG_JSON", false),
            worker_count: parse_env("QUILL_WORKERS", 4),
            pandoc_path: env_or("QUILL_PANDOC", "pandoc"),
            heartbeat_interval_secs: parse_env("QUILL_HEARTBEAT_SECS", 15),
            inactivity_timeout_secs: parse_env("QUILL_INACTIVITY_TIMEOUT_SECS", 300),
            mcp_timeout_secs: parse_env("QUILL_MCP_TIMEOUT_SECS", 60),
            cors_allowed_origins: std::env::var("QUILL_CORS_ORIGINS")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            enable_swagger: parse_bool("QUILL_ENABLE_SWAGGER", true),
        }
    }

    /// Heartbeat + inactivity-ceiling policy for the plain stream.
    pub fn plain_stream_policy(&self) -> StreamPolicy {
        StreamPolicy::heartbeat(
            Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            Duration::from_secs(self.inactivity_timeout_secs),
        )
    }

    /// Hard-deadline policy for the tool-protocol stream.
    pub fn protocol_stream_policy(&self) -> StreamPolicy {
        StreamPolicy::deadline(Duration::from_secs(self.mcp_timeout_secs))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            worker_count: 4,
            pandoc_path: "pandoc".to_owned(),
            heartbeat_interval_secs: 15,
            inactivity_timeout_secs: 300,
            mcp_timeout_secs: 60,
            cors_allowed_origins: None,
            enable_swagger: true,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
