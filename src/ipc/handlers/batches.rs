use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    batch_reads, get_optional_str, get_required_str, get_string_list, lock_conn, require_batch,
    shared_db, student_exists,
};
use crate::ipc::types::{AppState, Request};

/// Drops every cached read scoped to the batch.
pub fn invalidate_batch_reads(state: &AppState, batch_id: &str) {
    state.cache.invalidate(batch_reads(batch_id));
}

fn batches_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               b.id,
               b.name,
               b.academic_year,
               (SELECT COUNT(*) FROM batch_students bs WHERE bs.batch_id = b.id) AS student_count
             FROM batches b
             ORDER BY b.name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let batches = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "academicYear": r.get::<_, Option<String>>(2)?,
                "studentCount": r.get::<_, i64>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "batches": batches }))
}

fn batches_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let academic_year = get_optional_str(params, "academicYear");
    let batch_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO batches(id, name, academic_year, created_at) VALUES(?, ?, ?, ?)",
        (&batch_id, &name, &academic_year, Utc::now().to_rfc3339()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "batches" })))?;
    Ok(json!({ "batchId": batch_id, "name": name, "academicYear": academic_year }))
}

fn batches_enroll(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let student_ids = get_string_list(params, "studentIds")?;
    require_batch(conn, &batch_id)?;

    let enrolled_at = Utc::now().to_rfc3339();
    let mut enrolled = 0usize;
    let mut failures: Vec<serde_json::Value> = Vec::new();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for student_id in student_ids {
        if !student_exists(&tx, &student_id)? {
            failures.push(json!({
                "studentId": student_id,
                "code": "not_found",
                "message": "student not found"
            }));
            continue;
        }
        let changed = tx
            .execute(
                "INSERT OR IGNORE INTO batch_students(batch_id, student_id, enrolled_at)
                 VALUES(?, ?, ?)",
                (&batch_id, &student_id, &enrolled_at),
            )
            .map_err(|e| {
                HandlerErr::db("db_insert_failed", e)
                    .with_details(json!({ "table": "batch_students" }))
            })?;
        enrolled += changed;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "enrolled": enrolled, "failures": failures }))
}

fn batches_withdraw(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let student_id = get_required_str(params, "studentId")?;
    let removed = conn
        .execute(
            "DELETE FROM batch_students WHERE batch_id = ? AND student_id = ?",
            (&batch_id, &student_id),
        )
        .map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "batch_students" }))
        })?;
    if removed == 0 {
        return Err(HandlerErr::not_found("student is not enrolled in batch"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_batches_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = shared_db(state).and_then(|db| {
        let conn = lock_conn(&db)?;
        batches_list(&conn)
    });
    respond(&req.id, result)
}

fn handle_batches_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = shared_db(state).and_then(|db| {
        let conn = lock_conn(&db)?;
        batches_create(&conn, &req.params)
    });
    respond(&req.id, result)
}

fn handle_batches_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = shared_db(state).and_then(|db| {
        let conn = lock_conn(&db)?;
        batches_enroll(&conn, &req.params)
    });
    if result.is_ok() {
        if let Some(batch_id) = get_optional_str(&req.params, "batchId") {
            invalidate_batch_reads(state, &batch_id);
        }
    }
    respond(&req.id, result)
}

fn handle_batches_withdraw(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = shared_db(state).and_then(|db| {
        let conn = lock_conn(&db)?;
        batches_withdraw(&conn, &req.params)
    });
    if result.is_ok() {
        if let Some(batch_id) = get_optional_str(&req.params, "batchId") {
            invalidate_batch_reads(state, &batch_id);
        }
    }
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batches.list" => Some(handle_batches_list(state, req)),
        "batches.create" => Some(handle_batches_create(state, req)),
        "batches.enroll" => Some(handle_batches_enroll(state, req)),
        "batches.withdraw" => Some(handle_batches_withdraw(state, req)),
        _ => None,
    }
}
