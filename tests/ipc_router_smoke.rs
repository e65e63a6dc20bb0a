mod support;

use serde_json::json;
use support::spawn_daemon;

#[test]
fn health_and_unknown_methods() {
    let mut daemon = spawn_daemon();

    let health = daemon.request_ok("health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    assert_eq!(daemon.request_err("no.such.method", json!({})), "not_implemented");

    let bad = daemon.send_raw("{not json");
    assert_eq!(
        bad.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_json")
    );

    // The daemon keeps serving after a bad line.
    daemon.request_ok("health", json!({}));
}

#[test]
fn workspace_methods_require_a_workspace() {
    let mut daemon = spawn_daemon();

    for (method, params) in [
        ("batches.list", json!({})),
        ("students.list", json!({})),
        ("batches.create", json!({ "name": "X" })),
        ("students.create", json!({ "lastName": "A", "firstName": "B" })),
        ("attendance.batchSummary", json!({ "batchId": "b", "date": "2024-03-03" })),
        ("attendance.studentStats", json!({ "studentId": "s" })),
    ] {
        assert_eq!(daemon.request_err(method, params), "no_workspace", "{}", method);
    }
    assert_eq!(daemon.request_err("workspace.select", json!({})), "bad_params");
}

#[test]
fn admin_round_trip() {
    let mut daemon = spawn_daemon();
    let workspace = daemon.select_workspace("lmsd-router-admin");
    let health = daemon.request_ok("health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()),
        Some(&*workspace.to_string_lossy())
    );

    let batch = daemon.create_batch("Grade 9 A");
    let s1 = daemon.create_student("Brown", "Ben");
    let s2 = daemon.create_student("Adams", "Ada");
    let enrolled = daemon.request_ok(
        "batches.enroll",
        json!({ "batchId": batch, "studentIds": [s1, s2, "ghost"] }),
    );
    assert_eq!(enrolled.get("enrolled").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        enrolled.pointer("/failures/0/studentId").and_then(|v| v.as_str()),
        Some("ghost")
    );

    let batches = daemon.request_ok("batches.list", json!({}));
    assert_eq!(
        batches.pointer("/batches/0/studentCount").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        batches.pointer("/batches/0/academicYear").and_then(|v| v.as_str()),
        Some("2023-2024")
    );

    let roster = daemon.request_ok("students.list", json!({ "batchId": batch }));
    let names: Vec<&str> = roster
        .get("students")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|s| s.get("displayName").and_then(|v| v.as_str()))
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(names, vec!["Adams, Ada", "Brown, Ben"]);

    daemon.request_ok("batches.withdraw", json!({ "batchId": batch, "studentId": s1 }));
    assert_eq!(
        daemon.request_err("batches.withdraw", json!({ "batchId": batch, "studentId": s1 })),
        "not_found"
    );
    let roster = daemon.request_ok("students.list", json!({ "batchId": batch }));
    assert_eq!(
        roster.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    let everyone = daemon.request_ok("students.list", json!({}));
    assert_eq!(
        everyone.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );
    assert_eq!(
        daemon.request_err("students.list", json!({ "batchId": "no-such-batch" })),
        "not_found"
    );
}
