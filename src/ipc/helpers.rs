use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, SharedDb};
use crate::request_cache::{CacheOptions, KeyPattern};

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let value = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if value.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(value)
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_string_list(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(items) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    Ok(items
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Per-call cache knobs: `skipCache` and `ttlMs`.
pub fn cache_options(params: &serde_json::Value) -> Result<CacheOptions, HandlerErr> {
    let mut options = CacheOptions::default();
    if params
        .get("skipCache")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        options = options.skip_cache();
    }
    if let Some(v) = params.get("ttlMs") {
        let Some(ms) = v.as_u64() else {
            return Err(HandlerErr::bad_params("ttlMs must be a non-negative integer"));
        };
        options = options.with_ttl(Duration::from_millis(ms));
    }
    Ok(options)
}

/// Every cached read keyed under `batch:{id}:`.
pub fn batch_reads(batch_id: &str) -> KeyPattern {
    KeyPattern::prefix(format!("batch:{}:", batch_id))
}

/// Every cached read keyed under `student:{id}:`.
pub fn student_reads(student_id: &str) -> KeyPattern {
    KeyPattern::prefix(format!("student:{}:", student_id))
}

pub fn shared_db(state: &AppState) -> Result<SharedDb, HandlerErr> {
    state
        .db
        .as_ref()
        .map(Arc::clone)
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn lock_conn(db: &SharedDb) -> Result<MutexGuard<'_, Connection>, HandlerErr> {
    db.lock()
        .map_err(|_| HandlerErr::new("internal", "database lock poisoned"))
}

pub fn batch_exists(conn: &Connection, batch_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM batches WHERE id = ?", [batch_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub fn require_batch(conn: &Connection, batch_id: &str) -> Result<(), HandlerErr> {
    if batch_exists(conn, batch_id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found("batch not found"))
    }
}

/// Serves a read through the request cache. `read` runs against the workspace
/// connection only when no fresh cached value or live pending read exists.
pub fn cached_read<F>(
    state: &AppState,
    key: String,
    params: &serde_json::Value,
    read: F,
) -> Result<serde_json::Value, HandlerErr>
where
    F: FnOnce(&Connection) -> Result<serde_json::Value, HandlerErr> + Send + 'static,
{
    let db = shared_db(state)?;
    let options = cache_options(params)?;
    let pending = state.cache.execute(
        &key,
        move || async move {
            let conn = lock_conn(&db)?;
            read(&*conn)
        },
        options,
    );
    futures::executor::block_on(pending)
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}
