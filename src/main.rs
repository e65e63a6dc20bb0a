mod attendance;
mod config;
mod db;
mod ipc;
mod rate_limit;
mod request_cache;

use clap::Parser;
use serde_json::json;
use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(filter: &str) {
    // stdout carries the protocol; logs must go to stderr.
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("lmsd=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

fn main() {
    let config = config::DaemonConfig::parse();
    init_tracing(&config.log_filter);

    let mut state = ipc::AppState::new(&config);
    if let Some(path) = &config.workspace {
        if let Err(e) = state.open_workspace(path) {
            error!(workspace = %path.display(), "failed to open workspace: {e:?}");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "lmsd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                warn!("bad request json: {e}");
                let _ = writeln!(
                    stdout,
                    "{}",
                    json!({ "ok": false, "error": { "code": "bad_json", "message": e.to_string() } })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed, shutting down");
}
