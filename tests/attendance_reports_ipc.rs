mod support;

use serde_json::json;
use support::spawn_daemon;

#[test]
fn student_stats_zero_days_and_rounded_percentage() {
    let mut daemon = spawn_daemon();
    daemon.select_workspace("lmsd-stats");
    let batch = daemon.create_batch("Grade 9 A");
    let s1 = daemon.create_student("Adams", "Ada");
    daemon.enroll(&batch, &[s1.as_str()]);

    let empty = daemon.request_ok("attendance.studentStats", json!({ "studentId": s1 }));
    assert_eq!(empty.get("totalDays").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        empty.get("attendancePercentage").and_then(|v| v.as_f64()),
        Some(0.0)
    );

    for day in 1..=10 {
        let date = format!("2024-04-{:02}", day);
        daemon.mark(&batch, &date, &[(s1.as_str(), day <= 7)]);
    }

    let stats = daemon.request_ok(
        "attendance.studentStats",
        json!({ "studentId": s1, "batchId": batch }),
    );
    assert_eq!(stats.get("totalDays").and_then(|v| v.as_i64()), Some(10));
    assert_eq!(stats.get("presentDays").and_then(|v| v.as_i64()), Some(7));
    assert_eq!(stats.get("absentDays").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(
        stats.get("attendancePercentage").and_then(|v| v.as_f64()),
        Some(70.0)
    );
}

#[test]
fn batch_summary_uses_current_enrollment() {
    let mut daemon = spawn_daemon();
    daemon.select_workspace("lmsd-summary");
    let batch = daemon.create_batch("Grade 10 B");
    let s1 = daemon.create_student("Adams", "Ada");
    let s2 = daemon.create_student("Brown", "Ben");
    daemon.enroll(&batch, &[s1.as_str(), s2.as_str()]);
    daemon.mark(&batch, "2024-03-03", &[(s1.as_str(), true), (s2.as_str(), false)]);

    // Enrolled after the day was marked; still counted for that day.
    let late = daemon.create_student("Clark", "Cy");
    daemon.enroll(&batch, &[late.as_str()]);

    let summary = daemon.request_ok(
        "attendance.batchSummary",
        json!({ "batchId": batch, "date": "2024-03-03" }),
    );
    assert_eq!(summary.get("totalStudents").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(summary.get("presentCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(summary.get("absentCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        summary.get("attendancePercentage").and_then(|v| v.as_f64()),
        Some(33.33)
    );

    let code = daemon.request_err(
        "attendance.batchSummary",
        json!({ "batchId": "no-such-batch", "date": "2024-03-03" }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn monthly_report_lists_only_marked_days_in_order() {
    let mut daemon = spawn_daemon();
    daemon.select_workspace("lmsd-monthly");
    let batch = daemon.create_batch("Grade 11 C");
    let s1 = daemon.create_student("Adams", "Ada");
    let s2 = daemon.create_student("Brown", "Ben");
    daemon.enroll(&batch, &[s1.as_str(), s2.as_str()]);

    daemon.mark(&batch, "2024-03-17", &[(s1.as_str(), true), (s2.as_str(), false)]);
    daemon.mark(&batch, "2024-03-03", &[(s1.as_str(), true), (s2.as_str(), true)]);
    daemon.mark(&batch, "2024-02-29", &[(s1.as_str(), true)]);
    daemon.mark(&batch, "2024-04-01", &[(s1.as_str(), true)]);

    let report = daemon.request_ok(
        "attendance.monthlyReport",
        json!({ "batchId": batch, "year": 2024, "month": 3 }),
    );
    let summaries = report
        .get("summaries")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("summaries");
    let dates: Vec<&str> = summaries
        .iter()
        .filter_map(|s| s.get("date").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(dates, vec!["2024-03-03", "2024-03-17"]);
    assert_eq!(summaries[0].get("presentCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(summaries[1].get("absentCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        summaries[1].get("attendancePercentage").and_then(|v| v.as_f64()),
        Some(50.0)
    );

    let empty = daemon.request_ok(
        "attendance.monthlyReport",
        json!({ "batchId": batch, "year": 2024, "month": 5 }),
    );
    assert_eq!(
        empty.get("summaries").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let code = daemon.request_err(
        "attendance.monthlyReport",
        json!({ "batchId": batch, "year": 2024, "month": 13 }),
    );
    assert_eq!(code, "bad_params");
}
