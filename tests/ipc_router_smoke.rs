use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("attendance-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));

    // Data methods require a workspace.
    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "name": "Physics" }),
    );
    assert_eq!(error_code(&early), "no_workspace");

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "name": "Physics" }),
    );
    let subject_id = created
        .get("result")
        .and_then(|v| v.get("subjectId"))
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();

    let _ = request(&mut stdin, &mut reader, "5", "subjects.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "timetable.set",
        json!({ "subjectId": subject_id, "dayOfWeek": "monday", "periodStart": 1 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.mark",
        json!({ "subjectId": subject_id, "date": "2026-03-02", "status": "present" }),
    );
    let summary = request(&mut stdin, &mut reader, "8", "attendance.summary", json!({}));
    assert_eq!(summary.get("ok").and_then(|v| v.as_bool()), Some(true));
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "predict.threshold",
        json!({}),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "calendar.monthGrid",
        json!({ "year": 2026, "month": 3 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "templates.create",
        json!({ "name": "Smoke Template" }),
    );
    let _ = request(&mut stdin, &mut reader, "12", "templates.list", json!({}));

    let unknown = request(&mut stdin, &mut reader, "13", "totally.unknown", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
}
