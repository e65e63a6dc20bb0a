use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, lock_conn, require_batch, shared_db};
use crate::ipc::types::{AppState, Request};

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_optional_str(params, "batchId");
    let mut binds: Vec<Value> = Vec::new();
    let sql = match &batch_id {
        Some(id) => {
            require_batch(conn, id)?;
            binds.push(Value::Text(id.clone()));
            "SELECT s.id, s.last_name, s.first_name, s.student_no, s.active
             FROM students s
             JOIN batch_students bs ON bs.student_id = s.id
             WHERE bs.batch_id = ?
             ORDER BY s.last_name, s.first_name, s.id"
        }
        None => {
            "SELECT s.id, s.last_name, s.first_name, s.student_no, s.active
             FROM students s
             ORDER BY s.last_name, s.first_name, s.id"
        }
    };

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map(params_from_iter(binds), |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "lastName": last,
                "firstName": first,
                "studentNo": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, bool>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let student_no = get_optional_str(params, "studentNo");
    let active = params.get("active").and_then(|v| v.as_bool()).unwrap_or(true);

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, last_name, first_name, student_no, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &last_name,
            &first_name,
            &student_no,
            active,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "students" })))?;
    Ok(json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = shared_db(state).and_then(|db| {
        let conn = lock_conn(&db)?;
        students_list(&conn, &req.params)
    });
    respond(&req.id, result)
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = shared_db(state).and_then(|db| {
        let conn = lock_conn(&db)?;
        students_create(&conn, &req.params)
    });
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        _ => None,
    }
}
