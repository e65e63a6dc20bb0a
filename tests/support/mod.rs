#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Daemon {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_daemon() -> Daemon {
    spawn_daemon_with_args(&[])
}

pub fn spawn_daemon_with_args(args: &[&str]) -> Daemon {
    let exe = env!("CARGO_BIN_EXE_lmsd");
    let mut child = Command::new(exe)
        .args(args)
        .env_remove("LMSD_WORKSPACE")
        .env_remove("LMSD_CACHE_TTL_MS")
        .env_remove("LMSD_PENDING_STALE_MS")
        .env_remove("LMSD_RATE_LIMIT_MAX")
        .env_remove("LMSD_RATE_LIMIT_WINDOW_MS")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lmsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Daemon {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Daemon {
    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Returns the error code of a request expected to fail.
    pub fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }

    pub fn select_workspace(&mut self, prefix: &str) -> PathBuf {
        let workspace = temp_dir(prefix);
        self.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        workspace
    }

    pub fn create_batch(&mut self, name: &str) -> String {
        let created = self.request_ok("batches.create", json!({ "name": name, "academicYear": "2023-2024" }));
        created
            .get("batchId")
            .and_then(|v| v.as_str())
            .expect("batchId")
            .to_string()
    }

    pub fn create_student(&mut self, last: &str, first: &str) -> String {
        let created = self.request_ok(
            "students.create",
            json!({ "lastName": last, "firstName": first }),
        );
        created
            .get("studentId")
            .and_then(|v| v.as_str())
            .expect("studentId")
            .to_string()
    }

    pub fn enroll(&mut self, batch_id: &str, student_ids: &[&str]) {
        let result = self.request_ok(
            "batches.enroll",
            json!({ "batchId": batch_id, "studentIds": student_ids }),
        );
        assert_eq!(
            result.get("failures").and_then(|v| v.as_array()).map(|a| a.len()),
            Some(0),
            "enroll failures: {}",
            result
        );
    }

    pub fn mark(
        &mut self,
        batch_id: &str,
        date: &str,
        marks: &[(&str, bool)],
    ) -> Vec<serde_json::Value> {
        let records: Vec<serde_json::Value> = marks
            .iter()
            .map(|(id, present)| json!({ "studentId": id, "present": present }))
            .collect();
        let result = self.request_ok(
            "attendance.mark",
            json!({
                "batchId": batch_id,
                "date": date,
                "markedById": "instructor-1",
                "records": records
            }),
        );
        result
            .get("records")
            .and_then(|v| v.as_array())
            .cloned()
            .expect("records array")
    }
}
