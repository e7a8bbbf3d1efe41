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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn records_for(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    subject_id: &str,
) -> Vec<serde_json::Value> {
    request_ok(
        stdin,
        reader,
        id,
        "attendance.list",
        json!({ "subjectId": subject_id }),
    )
    .get("records")
    .and_then(|v| v.as_array())
    .cloned()
    .expect("records array")
}

#[test]
fn bulk_import_upserts_one_record_per_date_with_count_one() {
    let workspace = temp_dir("attendance-bulk-import");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.create",
        json!({ "name": "Computer Science" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();

    let dates = json!(["2026-01-05", "2026-01-06", "2026-01-07"]);
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.bulkImport",
        json!({ "subjectId": subject_id, "dates": dates, "status": "present" }),
    );
    assert_eq!(imported.get("imported").and_then(|v| v.as_i64()), Some(3));

    let records = records_for(&mut stdin, &mut reader, "4", &subject_id);
    assert_eq!(records.len(), 3);
    for r in &records {
        assert_eq!(r.get("count").and_then(|v| v.as_i64()), Some(1));
        assert_eq!(r.get("status").and_then(|v| v.as_str()), Some("present"));
    }

    // Re-importing the same dates replaces records instead of stacking.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.bulkImport",
        json!({ "subjectId": subject_id, "dates": dates, "status": "absent" }),
    );
    let records = records_for(&mut stdin, &mut reader, "6", &subject_id);
    assert_eq!(records.len(), 3);
    for r in &records {
        assert_eq!(r.get("status").and_then(|v| v.as_str()), Some("absent"));
        assert_eq!(r.get("count").and_then(|v| v.as_i64()), Some(1));
    }

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.summary",
        json!({ "subjectId": subject_id }),
    );
    let row = summary
        .get("subjects")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .cloned()
        .expect("summary row");
    assert_eq!(
        row.pointer("/aggregate/totalUnits").and_then(|v| v.as_i64()),
        Some(3)
    );
    assert_eq!(
        row.pointer("/aggregate/presentUnits").and_then(|v| v.as_i64()),
        Some(0)
    );

    // clear by status reports how many rows went away.
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.clear",
        json!({ "subjectId": subject_id, "status": "absent" }),
    );
    assert_eq!(cleared.get("deleted").and_then(|v| v.as_i64()), Some(3));
    assert!(records_for(&mut stdin, &mut reader, "9", &subject_id).is_empty());

    // clear "all" wipes whatever statuses remain.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.bulkImport",
        json!({ "subjectId": subject_id, "dates": ["2026-02-02"], "status": "holiday" }),
    );
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.clear",
        json!({ "subjectId": subject_id, "status": "all" }),
    );
    assert_eq!(cleared.get("deleted").and_then(|v| v.as_i64()), Some(1));

    // A malformed date anywhere in the batch rejects the whole call.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.bulkImport",
        json!({ "subjectId": subject_id, "dates": ["2026-01-05", "Jan 6"], "status": "present" }),
    );
    assert_eq!(code, "bad_params");
    assert!(records_for(&mut stdin, &mut reader, "13", &subject_id).is_empty());
}
