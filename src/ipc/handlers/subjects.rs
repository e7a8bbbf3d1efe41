use crate::calc::{self, RecordUnits, Status};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const DEFAULT_COLOR: &str = "#3B82F6";

fn derived_aggregate(conn: &Connection, subject_id: &str) -> Result<calc::Aggregate, String> {
    let mut stmt = conn
        .prepare("SELECT status, count FROM attendance_records WHERE subject_id = ?")
        .map_err(|e| e.to_string())?;
    let units = stmt
        .query_map([subject_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;

    Ok(calc::aggregate(units.into_iter().filter_map(
        |(status, count)| {
            Status::parse(&status).map(|status| RecordUnits { status, count })
        },
    )))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.name,
           s.color,
           (SELECT COUNT(*) FROM timetable_slots t WHERE t.subject_id = s.id) AS slot_count
         FROM subjects s
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Aggregates are derived from records on every read; nothing cached on
    // the subject row can drift.
    let mut subjects = Vec::with_capacity(rows.len());
    for (id, name, color, slot_count) in rows {
        let agg = match derived_aggregate(conn, &id) {
            Ok(a) => a,
            Err(e) => return err(&req.id, "db_query_failed", e, None),
        };
        subjects.push(json!({
            "id": id,
            "name": name,
            "color": color,
            "slotCount": slot_count,
            "aggregate": agg
        }));
    }

    ok(&req.id, json!({ "subjects": subjects }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let color = req
        .params
        .get("color")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_COLOR)
        .to_string();

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, color, created_at) VALUES(?, ?, ?, datetime('now'))",
        (&subject_id, &name, &color),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(
        &req.id,
        json!({ "subjectId": subject_id, "name": name, "color": color }),
    )
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    if let Some(name) = patch.get("name").and_then(|v| v.as_str()) {
        let name = name.trim();
        if name.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE subjects SET name = ? WHERE id = ?",
            (name, &subject_id),
        ) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "subjects" })),
            );
        }
    }
    if let Some(color) = patch.get("color").and_then(|v| v.as_str()) {
        let color = color.trim();
        if color.is_empty() {
            return err(&req.id, "bad_params", "color must not be empty", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE subjects SET color = ? WHERE id = ?",
            (color, &subject_id),
        ) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "subjects" })),
            );
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Deleting a subject takes its timetable slots and attendance records
    // with it; delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM attendance_records WHERE subject_id = ?",
        [&subject_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_records" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM timetable_slots WHERE subject_id = ?",
        [&subject_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "timetable_slots" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
