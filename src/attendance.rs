//! Attendance marking and aggregation.
//!
//! A mark call upserts one row per `(student, batch, date)` inside a single
//! transaction. Statistics are derived on demand and never persisted.

use chrono::{NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

/// Upper bound on rows returned by a record query.
pub const MAX_RESULT_ROWS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, AttendanceError>;

fn invalid(message: impl Into<String>) -> AttendanceError {
    AttendanceError::InvalidInput(message.into())
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkEntry {
    pub student_id: String,
    pub present: bool,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub batch_id: String,
    pub date: NaiveDate,
    pub present: bool,
    pub remarks: Option<String>,
    pub marked_by_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub student: StudentRef,
    pub batch: BatchRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_days: i64,
    pub present_days: i64,
    pub absent_days: i64,
    pub attendance_percentage: f64,
}

/// One day of attendance for a batch.
///
/// `total_students` is the batch's enrollment at query time, not on `date`.
/// Students enrolled after `date` are counted, so for historical days
/// `present_count + absent_count` can be lower than `total_students`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAttendanceSummary {
    pub batch_id: String,
    pub date: NaiveDate,
    pub total_students: i64,
    pub present_count: i64,
    pub absent_count: i64,
    pub attendance_percentage: f64,
}

/// Typed filter over `attendance_records`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttendanceQuery {
    pub batch_id: Option<String>,
    pub student_id: Option<String>,
    pub student_ids: Option<Vec<String>>,
    pub date: Option<NaiveDate>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub limit: Option<usize>,
}

impl AttendanceQuery {
    pub fn for_batch_day(batch_id: &str, date: NaiveDate) -> Self {
        Self {
            batch_id: Some(batch_id.to_string()),
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn for_student(student_id: &str, batch_id: Option<&str>) -> Self {
        Self {
            student_id: Some(student_id.to_string()),
            batch_id: batch_id.map(|s| s.to_string()),
            ..Self::default()
        }
    }

    pub fn with_students(mut self, student_ids: Vec<String>) -> Self {
        self.student_ids = Some(student_ids);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ids) = &self.student_ids {
            if ids.is_empty() {
                return Err(invalid("studentIds filter must not be empty"));
            }
        }
        if self.date.is_some() && self.date_range.is_some() {
            return Err(invalid("date and date range are mutually exclusive"));
        }
        if let Some((from, to)) = self.date_range {
            if from > to {
                return Err(invalid("date range start is after its end"));
            }
        }
        if let Some(limit) = self.limit {
            if limit == 0 || limit > MAX_RESULT_ROWS {
                return Err(invalid(format!(
                    "limit must be between 1 and {}",
                    MAX_RESULT_ROWS
                )));
            }
        }
        Ok(())
    }

    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(MAX_RESULT_ROWS)
    }

    /// Renders the filter against the `ar` alias.
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();

        if let Some(batch_id) = &self.batch_id {
            clauses.push("ar.batch_id = ?".to_string());
            binds.push(Value::Text(batch_id.clone()));
        }
        if let Some(student_id) = &self.student_id {
            clauses.push("ar.student_id = ?".to_string());
            binds.push(Value::Text(student_id.clone()));
        }
        if let Some(ids) = &self.student_ids {
            let placeholders = vec!["?"; ids.len()].join(", ");
            clauses.push(format!("ar.student_id IN ({})", placeholders));
            binds.extend(ids.iter().cloned().map(Value::Text));
        }
        if let Some(date) = self.date {
            clauses.push("ar.date = ?".to_string());
            binds.push(Value::Text(date_key(date)));
        }
        if let Some((from, to)) = self.date_range {
            clauses.push("ar.date BETWEEN ? AND ?".to_string());
            binds.push(Value::Text(date_key(from)));
            binds.push(Value::Text(date_key(to)));
        }

        if clauses.is_empty() {
            (String::new(), binds)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), binds)
        }
    }
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Percent rounded to two decimals; 0 when there is nothing to divide by.
pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    let raw = (part as f64) * 100.0 / (whole as f64);
    (raw * 100.0).round() / 100.0
}

pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| invalid(format!("invalid month {}-{:02}", year, month)))?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let last = next_first
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| invalid(format!("invalid month {}-{:02}", year, month)))?;
    Ok((first, last))
}

pub fn find_records(conn: &Connection, query: &AttendanceQuery) -> Result<Vec<AttendanceRecord>> {
    query.validate()?;
    let (where_sql, mut binds) = query.where_clause();
    let limit = query.effective_limit();
    binds.push(Value::Integer(limit as i64));

    let sql = format!(
        "SELECT ar.id, ar.student_id, ar.batch_id, ar.date, ar.present, ar.remarks,
                ar.marked_by_id, ar.created_at, ar.updated_at,
                s.last_name, s.first_name, b.name
         FROM attendance_records ar
         JOIN students s ON s.id = ar.student_id
         JOIN batches b ON b.id = ar.batch_id
         {}
         ORDER BY ar.date, s.last_name, s.first_name, ar.student_id
         LIMIT ?",
        where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let student_id: String = r.get(1)?;
            let batch_id: String = r.get(2)?;
            let last: String = r.get(9)?;
            let first: String = r.get(10)?;
            Ok(AttendanceRecord {
                id: r.get(0)?,
                student_id: student_id.clone(),
                batch_id: batch_id.clone(),
                date: r.get(3)?,
                present: r.get(4)?,
                remarks: r.get(5)?,
                marked_by_id: r.get(6)?,
                created_at: r.get(7)?,
                updated_at: r.get(8)?,
                student: StudentRef {
                    id: student_id,
                    display_name: format!("{}, {}", last, first),
                },
                batch: BatchRef {
                    id: batch_id,
                    name: r.get(11)?,
                },
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if rows.len() == limit {
        warn!(limit, "attendance query hit the row cap; result truncated");
    }
    Ok(rows)
}

/// Record ids keyed by student for the query's scope. Not row-capped: the
/// caller's student id set already bounds the result.
fn existing_record_ids(
    conn: &Connection,
    query: &AttendanceQuery,
) -> Result<HashMap<String, String>> {
    let (where_sql, binds) = query.where_clause();
    let sql = format!("SELECT ar.student_id, ar.id FROM attendance_records ar {}", where_sql);
    let mut stmt = conn.prepare(&sql)?;
    let pairs = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(pairs.into_iter().collect())
}

fn validate_marks(batch_id: &str, entries: &[MarkEntry], marked_by_id: &str) -> Result<()> {
    if batch_id.trim().is_empty() {
        return Err(invalid("batchId must not be empty"));
    }
    if marked_by_id.trim().is_empty() {
        return Err(invalid("markedById must not be empty"));
    }
    if entries.is_empty() {
        return Err(invalid("records must not be empty"));
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for entry in entries {
        if entry.student_id.trim().is_empty() {
            return Err(invalid("studentId must not be empty"));
        }
        if !seen.insert(entry.student_id.as_str()) {
            return Err(invalid(format!(
                "duplicate studentId in records: {}",
                entry.student_id
            )));
        }
    }
    Ok(())
}

/// Marks a batch's attendance for one day.
///
/// Existing rows for the same `(student, batch, date)` are updated in place,
/// the rest are inserted. Either every insert and update commits or none do.
/// Returns the stored rows for the marked students with relations filled in.
pub fn mark_attendance(
    conn: &Connection,
    batch_id: &str,
    date: NaiveDate,
    entries: &[MarkEntry],
    marked_by_id: &str,
) -> Result<Vec<AttendanceRecord>> {
    validate_marks(batch_id, entries, marked_by_id)?;

    let student_ids: Vec<String> = entries.iter().map(|e| e.student_id.clone()).collect();
    let scope = AttendanceQuery::for_batch_day(batch_id, date).with_students(student_ids);
    scope.validate()?;

    let existing = existing_record_ids(conn, &scope)?;
    let mut to_create: Vec<&MarkEntry> = Vec::new();
    let mut to_update: Vec<(&str, &MarkEntry)> = Vec::new();
    for entry in entries {
        match existing.get(&entry.student_id) {
            Some(record_id) => to_update.push((record_id.as_str(), entry)),
            None => to_create.push(entry),
        }
    }

    let now = Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO attendance_records(
                id, student_id, batch_id, date, present, remarks, marked_by_id, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for entry in &to_create {
            insert.execute((
                Uuid::new_v4().to_string(),
                &entry.student_id,
                batch_id,
                date,
                entry.present,
                &entry.remarks,
                marked_by_id,
                &now,
                &now,
            ))?;
        }

        let mut update = tx.prepare(
            "UPDATE attendance_records
             SET present = ?, remarks = ?, marked_by_id = ?, updated_at = ?
             WHERE id = ?",
        )?;
        for (record_id, entry) in &to_update {
            update.execute((entry.present, &entry.remarks, marked_by_id, &now, record_id))?;
        }
    }
    // Dropping an uncommitted transaction rolls it back.
    tx.commit()?;

    info!(
        batch_id,
        date = %date,
        created = to_create.len(),
        updated = to_update.len(),
        "attendance marked"
    );

    find_records(conn, &scope)
}

pub fn list_records(conn: &Connection, batch_id: &str, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
    find_records(conn, &AttendanceQuery::for_batch_day(batch_id, date))
}

fn count_present(conn: &Connection, query: &AttendanceQuery) -> Result<(i64, i64)> {
    query.validate()?;
    let (where_sql, binds) = query.where_clause();
    let sql = format!(
        "SELECT COUNT(*), COALESCE(SUM(ar.present), 0) FROM attendance_records ar {}",
        where_sql
    );
    let counts = conn.query_row(&sql, params_from_iter(binds), |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
    })?;
    Ok(counts)
}

pub fn student_stats(
    conn: &Connection,
    student_id: &str,
    batch_id: Option<&str>,
) -> Result<AttendanceStats> {
    let (total_days, present_days) =
        count_present(conn, &AttendanceQuery::for_student(student_id, batch_id))?;
    Ok(AttendanceStats {
        total_days,
        present_days,
        absent_days: total_days - present_days,
        attendance_percentage: percentage(present_days, total_days),
    })
}

pub fn enrolled_count(conn: &Connection, batch_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM batch_students WHERE batch_id = ?",
        [batch_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

fn summarize(
    batch_id: &str,
    date: NaiveDate,
    total_students: i64,
    marked: i64,
    present_count: i64,
) -> BatchAttendanceSummary {
    BatchAttendanceSummary {
        batch_id: batch_id.to_string(),
        date,
        total_students,
        present_count,
        absent_count: marked - present_count,
        attendance_percentage: percentage(present_count, total_students),
    }
}

pub fn batch_summary(conn: &Connection, batch_id: &str, date: NaiveDate) -> Result<BatchAttendanceSummary> {
    let total_students = enrolled_count(conn, batch_id)?;
    let (marked, present) = count_present(conn, &AttendanceQuery::for_batch_day(batch_id, date))?;
    Ok(summarize(batch_id, date, total_students, marked, present))
}

/// One summary per day of the month that has at least one record, ascending.
pub fn monthly_report(
    conn: &Connection,
    batch_id: &str,
    year: i32,
    month: u32,
) -> Result<Vec<BatchAttendanceSummary>> {
    let range = month_bounds(year, month)?;
    let query = AttendanceQuery {
        batch_id: Some(batch_id.to_string()),
        date_range: Some(range),
        ..AttendanceQuery::default()
    };
    query.validate()?;
    let total_students = enrolled_count(conn, batch_id)?;

    let (where_sql, binds) = query.where_clause();
    let sql = format!(
        "SELECT ar.date, COUNT(*), COALESCE(SUM(ar.present), 0)
         FROM attendance_records ar
         {}
         GROUP BY ar.date
         ORDER BY ar.date",
        where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let days = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, NaiveDate>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(days
        .into_iter()
        .map(|(date, marked, present)| summarize(batch_id, date, total_students, marked, present))
        .collect())
}
