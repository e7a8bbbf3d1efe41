use crate::calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn require_weekday(raw: &str) -> Option<String> {
    calendar::parse_weekday(raw).map(|d| calendar::weekday_name(d).to_string())
}

fn handle_timetable_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "slots": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT t.id, t.subject_id, s.name, t.day_of_week, t.period_start, t.period_end, t.merged
         FROM timetable_slots t
         JOIN subjects s ON s.id = t.subject_id
         ORDER BY t.day_of_week, t.period_start",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "subjectId": row.get::<_, String>(1)?,
                "subjectName": row.get::<_, String>(2)?,
                "dayOfWeek": row.get::<_, String>(3)?,
                "periodStart": row.get::<_, i64>(4)?,
                "periodEnd": row.get::<_, i64>(5)?,
                "merged": row.get::<_, i64>(6)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(slots) => ok(&req.id, json!({ "slots": slots })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_timetable_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let day = match req
        .params
        .get("dayOfWeek")
        .and_then(|v| v.as_str())
        .and_then(require_weekday)
    {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "dayOfWeek must be a weekday name", None),
    };
    let period_start = match req.params.get("periodStart").and_then(|v| v.as_i64()) {
        Some(v) if v >= 1 => v,
        Some(_) => return err(&req.id, "bad_params", "periodStart must be >= 1", None),
        None => return err(&req.id, "bad_params", "missing periodStart", None),
    };
    let period_end = match req.params.get("periodEnd").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => period_start,
    };
    if period_end < period_start {
        return err(&req.id, "bad_params", "periodEnd must be >= periodStart", None);
    }
    let merged = req
        .params
        .get("merged")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

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

    // Same-day slots must not overlap in period range; an insert evicts
    // whatever it overlaps rather than failing.
    let replaced = match tx.execute(
        "DELETE FROM timetable_slots
         WHERE day_of_week = ? AND period_start <= ? AND period_end >= ?",
        (&day, period_end, period_start),
    ) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "timetable_slots" })),
            );
        }
    };

    let slot_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO timetable_slots(id, subject_id, day_of_week, period_start, period_end, merged)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &slot_id,
            &subject_id,
            &day,
            period_start,
            period_end,
            merged as i64,
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

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "slotId": slot_id, "replacedSlots": replaced }),
    )
}

fn handle_timetable_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let slot_id = match req.params.get("slotId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing slotId", None),
    };
    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));

    let existing: Option<(String, i64, i64)> = match conn
        .query_row(
            "SELECT day_of_week, period_start, period_end FROM timetable_slots WHERE id = ?",
            [&slot_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((day, period_start, period_end)) = existing else {
        return err(&req.id, "not_found", "slot not found", None);
    };

    let day = match patch.get("dayOfWeek").and_then(|v| v.as_str()) {
        Some(raw) => match require_weekday(raw) {
            Some(v) => v,
            None => {
                return err(&req.id, "bad_params", "dayOfWeek must be a weekday name", None)
            }
        },
        None => day,
    };
    let period_start = patch
        .get("periodStart")
        .and_then(|v| v.as_i64())
        .unwrap_or(period_start);
    let period_end = patch
        .get("periodEnd")
        .and_then(|v| v.as_i64())
        .unwrap_or(period_end);
    if period_start < 1 || period_end < period_start {
        return err(&req.id, "bad_params", "invalid period range", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE timetable_slots SET day_of_week = ?, period_start = ?, period_end = ? WHERE id = ?",
        (&day, period_start, period_end, &slot_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "timetable_slots" })),
        );
    }
    if let Some(merged) = patch.get("merged").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE timetable_slots SET merged = ? WHERE id = ?",
            (merged as i64, &slot_id),
        ) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "timetable_slots" })),
            );
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_timetable_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(slot_id) = req.params.get("slotId").and_then(|v| v.as_str()) {
        let deleted = match conn.execute("DELETE FROM timetable_slots WHERE id = ?", [slot_id]) {
            Ok(n) => n,
            Err(e) => {
                return err(
                    &req.id,
                    "db_delete_failed",
                    e.to_string(),
                    Some(json!({ "table": "timetable_slots" })),
                )
            }
        };
        if deleted == 0 {
            return err(&req.id, "not_found", "slot not found", None);
        }
        return ok(&req.id, json!({ "deleted": deleted }));
    }

    let day = req
        .params
        .get("dayOfWeek")
        .and_then(|v| v.as_str())
        .and_then(require_weekday);
    let period = req.params.get("period").and_then(|v| v.as_i64());
    let (Some(day), Some(period)) = (day, period) else {
        return err(
            &req.id,
            "bad_params",
            "either slotId or dayOfWeek and period are required",
            None,
        );
    };

    match conn.execute(
        "DELETE FROM timetable_slots
         WHERE day_of_week = ? AND period_start <= ? AND period_end >= ?",
        (&day, period, period),
    ) {
        Ok(deleted) => ok(&req.id, json!({ "deleted": deleted })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "timetable_slots" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.list" => Some(handle_timetable_list(state, req)),
        "timetable.set" => Some(handle_timetable_set(state, req)),
        "timetable.update" => Some(handle_timetable_update(state, req)),
        "timetable.delete" => Some(handle_timetable_delete(state, req)),
        _ => None,
    }
}
