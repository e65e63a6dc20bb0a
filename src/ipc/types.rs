use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

use crate::config::DaemonConfig;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::rate_limit::RateLimiter;
use crate::request_cache::RequestCache;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub type SharedDb = Arc<Mutex<Connection>>;

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<SharedDb>,
    pub cache: RequestCache<serde_json::Value, HandlerErr>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            workspace: None,
            db: None,
            cache: RequestCache::new(config.cache_settings()),
            limiter: RateLimiter::new(config.rate_limit_settings()),
        }
    }

    /// Opens (or creates) the workspace database and drops every cached read
    /// from a previously selected workspace.
    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let conn = db::open_db(path)?;
        self.workspace = Some(path.to_path_buf());
        self.db = Some(Arc::new(Mutex::new(conn)));
        self.cache.clear();
        self.limiter.reset();
        info!(workspace = %path.display(), "workspace opened");
        Ok(())
    }
}
