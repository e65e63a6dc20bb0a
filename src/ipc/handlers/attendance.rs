use serde::Deserialize;
use serde_json::json;

use crate::attendance::{self, AttendanceError, MarkEntry};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::batches::invalidate_batch_reads;
use crate::ipc::helpers::{
    cached_read, get_optional_str, get_required_date, get_required_i64, get_required_str,
    lock_conn, require_batch, shared_db, student_reads, to_json,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkParam {
    student_id: String,
    present: bool,
    #[serde(default)]
    remarks: Option<String>,
}

impl From<MarkParam> for MarkEntry {
    fn from(p: MarkParam) -> Self {
        MarkEntry {
            student_id: p.student_id.trim().to_string(),
            present: p.present,
            remarks: p
                .remarks
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
        }
    }
}

fn parse_mark_entries(params: &serde_json::Value) -> Result<Vec<MarkEntry>, HandlerErr> {
    let Some(raw) = params.get("records") else {
        return Err(HandlerErr::bad_params("missing records"));
    };
    let parsed: Vec<MarkParam> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid records: {}", e)))?;
    Ok(parsed.into_iter().map(MarkEntry::from).collect())
}

fn student_stats_key(student_id: &str, batch_id: Option<&str>) -> String {
    format!("student:{}:stats:{}", student_id, batch_id.unwrap_or("all"))
}

fn attendance_mark(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let date = get_required_date(params, "date")?;
    let marked_by_id = get_required_str(params, "markedById")?;
    let entries = parse_mark_entries(params)?;

    if let Err(rejected) = state.limiter.check(&format!("attendance.mark:{}", marked_by_id)) {
        return Err(HandlerErr::new("rate_limited", "too many attendance updates")
            .with_details(json!({ "retryAfterMs": rejected.retry_after.as_millis() as u64 })));
    }

    let db = shared_db(state)?;
    let records = {
        let conn = lock_conn(&db)?;
        require_batch(&conn, &batch_id)?;
        attendance::mark_attendance(&conn, &batch_id, date, &entries, &marked_by_id).map_err(
            |e| match e {
                AttendanceError::Db(e) => HandlerErr::db("db_update_failed", e)
                    .with_details(json!({ "table": "attendance_records" })),
                other => HandlerErr::from(other),
            },
        )?
    };

    invalidate_batch_reads(state, &batch_id);
    for entry in &entries {
        state.cache.invalidate(student_reads(&entry.student_id));
    }

    Ok(json!({ "records": to_json(&records)? }))
}

fn attendance_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let date = get_required_date(params, "date")?;
    let key = format!("batch:{}:records:{}", batch_id, attendance::date_key(date));
    cached_read(state, key, params, move |conn| {
        require_batch(conn, &batch_id)?;
        let records = attendance::list_records(conn, &batch_id, date)?;
        Ok(json!({ "records": to_json(&records)? }))
    })
}

fn attendance_student_stats(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let batch_id = get_optional_str(params, "batchId");
    let key = student_stats_key(&student_id, batch_id.as_deref());
    cached_read(state, key, params, move |conn| {
        let stats = attendance::student_stats(conn, &student_id, batch_id.as_deref())?;
        to_json(&stats)
    })
}

fn attendance_batch_summary(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let date = get_required_date(params, "date")?;
    let key = format!("batch:{}:summary:{}", batch_id, attendance::date_key(date));
    cached_read(state, key, params, move |conn| {
        require_batch(conn, &batch_id)?;
        let summary = attendance::batch_summary(conn, &batch_id, date)?;
        to_json(&summary)
    })
}

fn attendance_monthly_report(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let year = get_required_i64(params, "year")?;
    let month = get_required_i64(params, "month")?;
    let year = i32::try_from(year).map_err(|_| HandlerErr::bad_params("year out of range"))?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr::bad_params("month must be between 1 and 12"));
    }
    let month = month as u32;
    let key = format!("batch:{}:report:{:04}-{:02}", batch_id, year, month);
    cached_read(state, key, params, move |conn| {
        require_batch(conn, &batch_id)?;
        let summaries = attendance::monthly_report(conn, &batch_id, year, month)?;
        Ok(json!({
            "year": year,
            "month": month,
            "summaries": to_json(&summaries)?
        }))
    })
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, attendance_mark(state, &req.params))
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, attendance_list(state, &req.params))
}

fn handle_attendance_student_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, attendance_student_stats(state, &req.params))
}

fn handle_attendance_batch_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, attendance_batch_summary(state, &req.params))
}

fn handle_attendance_monthly_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, attendance_monthly_report(state, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.studentStats" => Some(handle_attendance_student_stats(state, req)),
        "attendance.batchSummary" => Some(handle_attendance_batch_summary(state, req)),
        "attendance.monthlyReport" => Some(handle_attendance_monthly_report(state, req)),
        _ => None,
    }
}
