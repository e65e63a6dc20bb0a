use crate::rate_limit::RateLimitSettings;
use crate::request_cache::CacheSettings;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Attendance sidecar: newline-delimited JSON requests on stdin, responses on stdout.
#[derive(Debug, Clone, Parser)]
#[command(name = "lmsd", version)]
pub struct DaemonConfig {
    /// Workspace directory to open at startup.
    #[arg(long, env = "LMSD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Default lifetime of cached read results.
    #[arg(long, env = "LMSD_CACHE_TTL_MS", default_value_t = 30_000)]
    pub cache_ttl_ms: u64,

    /// Age after which an unsettled request stops being shared.
    #[arg(long, env = "LMSD_PENDING_STALE_MS", default_value_t = 5_000)]
    pub pending_stale_ms: u64,

    #[arg(long, env = "LMSD_RATE_LIMIT_MAX", default_value_t = 120)]
    pub rate_limit_max: u32,

    #[arg(long, env = "LMSD_RATE_LIMIT_WINDOW_MS", default_value_t = 60_000)]
    pub rate_limit_window_ms: u64,

    /// tracing filter directive, e.g. `lmsd=debug`.
    #[arg(long = "log", env = "LMSD_LOG", default_value = "lmsd=info")]
    pub log_filter: String,
}

impl DaemonConfig {
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            default_ttl: Duration::from_millis(self.cache_ttl_ms),
            pending_stale_after: Duration::from_millis(self.pending_stale_ms),
        }
    }

    pub fn rate_limit_settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            max_requests: self.rate_limit_max,
            window: Duration::from_millis(self.rate_limit_window_ms),
        }
    }
}
