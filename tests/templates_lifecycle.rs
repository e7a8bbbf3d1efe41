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

fn create_subject_with_slot(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id_prefix: &str,
    name: &str,
    day: &str,
    period: i64,
) -> String {
    let subject = request_ok(
        stdin,
        reader,
        &format!("{}-subj", id_prefix),
        "subjects.create",
        json!({ "name": name }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        &format!("{}-slot", id_prefix),
        "timetable.set",
        json!({ "subjectId": subject_id, "dayOfWeek": day, "periodStart": period }),
    );
    subject_id
}

#[test]
fn template_snapshot_import_and_cap() {
    let workspace = temp_dir("attendance-templates");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // No subjects yet: nothing to snapshot.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "templates.create",
        json!({ "name": "Empty" }),
    );
    assert_eq!(code, "bad_params");

    let math_id = create_subject_with_slot(
        &mut stdin,
        &mut reader,
        "3",
        "Mathematics",
        "monday",
        1,
    );
    let _physics_id = create_subject_with_slot(
        &mut stdin,
        &mut reader,
        "4",
        "Physics",
        "tuesday",
        2,
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "templates.create",
        json!({ "name": "Semester 4", "semester": "4", "section": "B" }),
    );
    let template_id = created
        .get("templateId")
        .and_then(|v| v.as_str())
        .expect("templateId")
        .to_string();
    assert_eq!(created.get("subjectCount").and_then(|v| v.as_i64()), Some(2));

    let listed = request_ok(&mut stdin, &mut reader, "6", "templates.list", json!({}));
    let row = listed
        .get("templates")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .cloned()
        .expect("template row");
    assert_eq!(row.get("subjectCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(row.get("slotCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(row.get("importCount").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(row.get("semester").and_then(|v| v.as_str()), Some("4"));

    // Seed attendance, then import the template over a wiped workspace.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.mark",
        json!({ "subjectId": math_id, "date": "2026-03-02", "status": "present" }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "templates.import",
        json!({ "templateId": template_id, "clearExisting": true }),
    );
    assert_eq!(
        imported.get("subjectsCreated").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        imported.get("subjectsUpdated").and_then(|v| v.as_i64()),
        Some(0)
    );

    let subjects = request_ok(&mut stdin, &mut reader, "9", "subjects.list", json!({}));
    assert_eq!(
        subjects
            .get("subjects")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );
    let slots = request_ok(&mut stdin, &mut reader, "10", "timetable.list", json!({}));
    assert_eq!(
        slots.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );
    // clearExisting wiped the old records along with the old subjects.
    let records = request_ok(&mut stdin, &mut reader, "11", "attendance.list", json!({}));
    assert_eq!(
        records
            .get("records")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // Importing again without clearing matches by name and only updates.
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "templates.import",
        json!({ "templateId": template_id }),
    );
    assert_eq!(
        imported.get("subjectsCreated").and_then(|v| v.as_i64()),
        Some(0)
    );
    assert_eq!(
        imported.get("subjectsUpdated").and_then(|v| v.as_i64()),
        Some(2)
    );

    let listed = request_ok(&mut stdin, &mut reader, "13", "templates.list", json!({}));
    let row = listed
        .get("templates")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .cloned()
        .expect("template row");
    assert_eq!(row.get("importCount").and_then(|v| v.as_i64()), Some(2));

    // Cap: five templates per workspace.
    for i in 0..4 {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("cap-{}", i),
            "templates.create",
            json!({ "name": format!("Filler {}", i) }),
        );
    }
    let code = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "templates.create",
        json!({ "name": "One Too Many" }),
    );
    assert_eq!(code, "limit_reached");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "templates.delete",
        json!({ "templateId": template_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "16",
        "templates.import",
        json!({ "templateId": template_id }),
    );
    assert_eq!(code, "not_found");
}
