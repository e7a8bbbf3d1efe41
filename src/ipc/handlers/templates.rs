use crate::exchange::{self, TemplatePayload, TemplateSlotPayload, TemplateSubjectPayload};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

const MAX_TEMPLATES: i64 = 5;

fn optional_trimmed(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn template_count(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("SELECT COUNT(*) FROM templates", [], |r| r.get(0))
}

fn insert_template_rows(
    conn: &Connection,
    payload: &TemplatePayload,
) -> Result<String, rusqlite::Error> {
    let template_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO templates(id, name, description, semester, section, batch, import_count, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 0, datetime('now'))",
        (
            &template_id,
            &payload.name,
            &payload.description,
            &payload.semester,
            &payload.section,
            &payload.batch,
        ),
    )?;
    for subject in &payload.subjects {
        let template_subject_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO template_subjects(id, template_id, name, color) VALUES(?, ?, ?, ?)",
            (
                &template_subject_id,
                &template_id,
                &subject.name,
                &subject.color,
            ),
        )?;
        for slot in &subject.slots {
            conn.execute(
                "INSERT INTO template_slots(id, template_subject_id, day_of_week, period_start, period_end, merged)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &template_subject_id,
                    &slot.day_of_week,
                    slot.period_start,
                    slot.period_end,
                    slot.merged as i64,
                ),
            )?;
        }
    }
    Ok(template_id)
}

fn load_template_payload(
    conn: &Connection,
    template_id: &str,
) -> Result<Option<TemplatePayload>, rusqlite::Error> {
    let header: Option<(String, Option<String>, Option<String>, Option<String>, Option<String>)> =
        conn.query_row(
            "SELECT name, description, semester, section, batch FROM templates WHERE id = ?",
            [template_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()?;
    let Some((name, description, semester, section, batch)) = header else {
        return Ok(None);
    };

    let mut subj_stmt = conn.prepare(
        "SELECT id, name, color FROM template_subjects WHERE template_id = ? ORDER BY name",
    )?;
    let subject_rows = subj_stmt
        .query_map([template_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut slot_stmt = conn.prepare(
        "SELECT day_of_week, period_start, period_end, merged
         FROM template_slots
         WHERE template_subject_id = ?
         ORDER BY day_of_week, period_start",
    )?;

    let mut subjects = Vec::with_capacity(subject_rows.len());
    for (template_subject_id, subject_name, color) in subject_rows {
        let slots = slot_stmt
            .query_map([&template_subject_id], |r| {
                Ok(TemplateSlotPayload {
                    day_of_week: r.get(0)?,
                    period_start: r.get(1)?,
                    period_end: r.get(2)?,
                    merged: r.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        subjects.push(TemplateSubjectPayload {
            name: subject_name,
            color,
            slots,
        });
    }

    Ok(Some(TemplatePayload {
        name,
        description,
        semester,
        section,
        batch,
        subjects,
    }))
}

fn handle_templates_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "templates": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.description,
           t.semester,
           t.section,
           t.batch,
           t.import_count,
           (SELECT COUNT(*) FROM template_subjects ts WHERE ts.template_id = t.id) AS subject_count,
           (SELECT COUNT(*)
              FROM template_slots sl
              JOIN template_subjects ts ON ts.id = sl.template_subject_id
             WHERE ts.template_id = t.id) AS slot_count
         FROM templates t
         ORDER BY t.import_count DESC, t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?,
                "semester": row.get::<_, Option<String>>(3)?,
                "section": row.get::<_, Option<String>>(4)?,
                "batch": row.get::<_, Option<String>>(5)?,
                "importCount": row.get::<_, i64>(6)?,
                "subjectCount": row.get::<_, i64>(7)?,
                "slotCount": row.get::<_, i64>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(templates) => ok(&req.id, json!({ "templates": templates })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_templates_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match template_count(conn) {
        Ok(n) if n >= MAX_TEMPLATES => {
            return err(
                &req.id,
                "limit_reached",
                format!("at most {} templates per workspace", MAX_TEMPLATES),
                None,
            )
        }
        Ok(_) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Snapshot the current subjects and their timetable into the template.
    let mut subj_stmt = match conn.prepare("SELECT id, name, color FROM subjects ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subject_rows = subj_stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let subject_rows = match subject_rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if subject_rows.is_empty() {
        return err(&req.id, "bad_params", "no subjects to snapshot", None);
    }

    let mut slot_stmt = match conn.prepare(
        "SELECT day_of_week, period_start, period_end, merged
         FROM timetable_slots
         WHERE subject_id = ?
         ORDER BY day_of_week, period_start",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut subjects = Vec::with_capacity(subject_rows.len());
    for (subject_id, subject_name, color) in &subject_rows {
        let slots = slot_stmt
            .query_map([subject_id], |r| {
                Ok(TemplateSlotPayload {
                    day_of_week: r.get(0)?,
                    period_start: r.get(1)?,
                    period_end: r.get(2)?,
                    merged: r.get::<_, i64>(3)? != 0,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let slots = match slots {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        subjects.push(TemplateSubjectPayload {
            name: subject_name.clone(),
            color: color.clone(),
            slots,
        });
    }

    let payload = TemplatePayload {
        name,
        description: optional_trimmed(&req.params, "description"),
        semester: optional_trimmed(&req.params, "semester"),
        section: optional_trimmed(&req.params, "section"),
        batch: optional_trimmed(&req.params, "batch"),
        subjects,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let template_id = match insert_template_rows(&tx, &payload) {
        Ok(id) => id,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "templates" })),
            );
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "templateId": template_id,
            "subjectCount": payload.subjects.len()
        }),
    )
}

fn handle_templates_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let template_id = match req.params.get("templateId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing templateId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM templates WHERE id = ?", [&template_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "template not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM template_slots
         WHERE template_subject_id IN (
           SELECT id FROM template_subjects WHERE template_id = ?
         )",
        [&template_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "template_slots" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM template_subjects WHERE template_id = ?",
        [&template_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "template_subjects" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM templates WHERE id = ?", [&template_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "templates" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_templates_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let template_id = match req.params.get("templateId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing templateId", None),
    };
    let clear_existing = req
        .params
        .get("clearExisting")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let payload = match load_template_payload(conn, &template_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "template not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if clear_existing {
        for sql in [
            "DELETE FROM attendance_records",
            "DELETE FROM timetable_slots",
            "DELETE FROM subjects",
        ] {
            if let Err(e) = tx.execute(sql, []) {
                let _ = tx.rollback();
                return err(&req.id, "db_delete_failed", e.to_string(), None);
            }
        }
    }

    let mut created = 0_i64;
    let mut updated = 0_i64;
    for subject in &payload.subjects {
        let existing: Option<String> = match tx
            .query_row(
                "SELECT id FROM subjects WHERE name = ?",
                [&subject.name],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };

        let subject_id = match existing {
            Some(id) => {
                if let Err(e) = tx.execute(
                    "UPDATE subjects SET color = ? WHERE id = ?",
                    (&subject.color, &id),
                ) {
                    let _ = tx.rollback();
                    return err(
                        &req.id,
                        "db_update_failed",
                        e.to_string(),
                        Some(json!({ "table": "subjects" })),
                    );
                }
                updated += 1;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                if let Err(e) = tx.execute(
                    "INSERT INTO subjects(id, name, color, created_at) VALUES(?, ?, ?, datetime('now'))",
                    (&id, &subject.name, &subject.color),
                ) {
                    let _ = tx.rollback();
                    return err(
                        &req.id,
                        "db_insert_failed",
                        e.to_string(),
                        Some(json!({ "table": "subjects" })),
                    );
                }
                created += 1;
                id
            }
        };

        // The template's timetable replaces whatever the subject had;
        // attendance records are never touched by an import.
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
        for slot in &subject.slots {
            if let Err(e) = tx.execute(
                "INSERT INTO timetable_slots(id, subject_id, day_of_week, period_start, period_end, merged)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &subject_id,
                    &slot.day_of_week,
                    slot.period_start,
                    slot.period_end,
                    slot.merged as i64,
                ),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "timetable_slots" })),
                );
            }
        }
    }

    if let Err(e) = tx.execute(
        "UPDATE templates SET import_count = import_count + 1 WHERE id = ?",
        [&template_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "templates" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "subjectsCreated": created,
            "subjectsUpdated": updated
        }),
    )
}

fn handle_templates_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let template_id = match req.params.get("templateId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing templateId", None),
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing outPath", None),
    };

    let payload = match load_template_payload(conn, &template_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "template not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match exchange::export_template_bundle(&payload, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "subjectCount": summary.subject_count,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

fn handle_templates_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let path = match req.params.get("path").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing path", None),
    };

    let payload = match exchange::import_template_bundle(&path) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "bundle_invalid", format!("{e:#}"), None),
    };

    match template_count(conn) {
        Ok(n) if n >= MAX_TEMPLATES => {
            return err(
                &req.id,
                "limit_reached",
                format!("at most {} templates per workspace", MAX_TEMPLATES),
                None,
            )
        }
        Ok(_) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let template_id = match insert_template_rows(&tx, &payload) {
        Ok(id) => id,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "templates" })),
            );
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "templateId": template_id,
            "name": payload.name,
            "subjectCount": payload.subjects.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "templates.list" => Some(handle_templates_list(state, req)),
        "templates.create" => Some(handle_templates_create(state, req)),
        "templates.delete" => Some(handle_templates_delete(state, req)),
        "templates.import" => Some(handle_templates_import(state, req)),
        "templates.exportBundle" => Some(handle_templates_export_bundle(state, req)),
        "templates.importBundle" => Some(handle_templates_import_bundle(state, req)),
        _ => None,
    }
}
