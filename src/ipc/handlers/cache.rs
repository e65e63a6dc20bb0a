use regex::Regex;
use serde_json::json;

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::get_optional_str;
use crate::ipc::types::{AppState, Request};

fn cache_invalidate(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    match (get_optional_str(params, "key"), get_optional_str(params, "pattern")) {
        (Some(key), None) => state.cache.invalidate(key),
        (None, Some(pattern)) => {
            let re = Regex::new(&pattern)
                .map_err(|e| HandlerErr::bad_params(format!("invalid pattern: {}", e)))?;
            state.cache.invalidate(re);
        }
        _ => return Err(HandlerErr::bad_params("pass exactly one of key or pattern")),
    }
    Ok(json!({ "ok": true }))
}

fn cache_stats(state: &AppState) -> serde_json::Value {
    let stats = state.cache.stats();
    let settings = state.cache.settings();
    json!({
        "cached": stats.cached,
        "pending": stats.pending,
        "defaultTtlMs": settings.default_ttl.as_millis() as u64,
        "pendingStaleMs": settings.pending_stale_after.as_millis() as u64
    })
}

fn handle_cache_invalidate(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, cache_invalidate(state, &req.params))
}

fn handle_cache_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.cache.clear();
    respond(&req.id, Ok(json!({ "ok": true })))
}

fn handle_cache_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, Ok(cache_stats(state)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cache.invalidate" => Some(handle_cache_invalidate(state, req)),
        "cache.clear" | "session.logout" => Some(handle_cache_clear(state, req)),
        "cache.stats" => Some(handle_cache_stats(state, req)),
        _ => None,
    }
}
