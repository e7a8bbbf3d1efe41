use crate::calc::{self, RecordUnits, Status};
use crate::calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn bad_params(message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn db(code: &'static str, e: impl ToString) -> HandlerErr {
        HandlerErr {
            code,
            message: e.to_string(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn parse_date_param(raw: &str) -> Result<NaiveDate, HandlerErr> {
    calendar::parse_date(raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("invalid date: {} (want YYYY-MM-DD)", raw)))
}

fn parse_status_param(raw: &str) -> Result<Status, HandlerErr> {
    Status::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be present, absent or holiday".to_string())
    })
}

fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Periods this subject has on the given weekday, per the timetable.
/// Falls back to 1 when the timetable has nothing for that day.
fn periods_on_weekday(
    conn: &Connection,
    subject_id: &str,
    date: NaiveDate,
) -> Result<i64, HandlerErr> {
    let day = calendar::weekday_name(date.weekday());
    let slots: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM timetable_slots WHERE subject_id = ? AND day_of_week = ?",
            (subject_id, day),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(if slots > 0 { slots } else { 1 })
}

fn upsert_record(
    conn: &Connection,
    subject_id: &str,
    date: NaiveDate,
    status: Status,
    period: (Option<i64>, Option<i64>),
    count: i64,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO attendance_records(id, subject_id, date, status, period_start, period_end, count)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(subject_id, date) DO UPDATE SET
           status = excluded.status,
           period_start = excluded.period_start,
           period_end = excluded.period_end,
           count = excluded.count",
        (
            Uuid::new_v4().to_string(),
            subject_id,
            calendar::format_date(date),
            status.as_str(),
            period.0,
            period.1,
            count,
        ),
    )
    .map(|_| ())
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_records" })),
    })
}

/// Optional period range on a single mark. When only a start is given the
/// range collapses to that one period.
fn parse_period_range(params: &serde_json::Value) -> Result<(Option<i64>, Option<i64>), HandlerErr> {
    let start = params.get("periodStart").and_then(|v| v.as_i64());
    let end = params.get("periodEnd").and_then(|v| v.as_i64());
    match (start, end) {
        (None, None) => Ok((None, None)),
        (None, Some(_)) => Err(HandlerErr::bad_params(
            "periodEnd requires periodStart".to_string(),
        )),
        (Some(s), _) if s < 1 => Err(HandlerErr::bad_params("periodStart must be >= 1".to_string())),
        (Some(s), Some(e)) if e < s => Err(HandlerErr::bad_params(
            "periodEnd must be >= periodStart".to_string(),
        )),
        (Some(s), end) => Ok((Some(s), Some(end.unwrap_or(s)))),
    }
}

fn load_units(conn: &Connection, subject_id: &str) -> Result<Vec<RecordUnits>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT status, count FROM attendance_records WHERE subject_id = ?")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([subject_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(rows
        .into_iter()
        .filter_map(|(status, count)| {
            Status::parse(&status).map(|status| RecordUnits { status, count })
        })
        .collect())
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_filter = params
        .get("subjectId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let sql = "SELECT id, subject_id, date, status, period_start, period_end, count
               FROM attendance_records
               WHERE (?1 IS NULL OR subject_id = ?1)
               ORDER BY subject_id, date";
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let records = stmt
        .query_map([&subject_filter], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "periodStart": r.get::<_, Option<i64>>(4)?,
                "periodEnd": r.get::<_, Option<i64>>(5)?,
                "count": r.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "records": records }))
}

fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let date = parse_date_param(&get_required_str(params, "date")?)?;
    let status = parse_status_param(&get_required_str(params, "status")?)?;
    let period = parse_period_range(params)?;

    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }

    let count = periods_on_weekday(conn, &subject_id, date)?;
    upsert_record(conn, &subject_id, date, status, period, count)?;

    Ok(json!({
        "subjectId": subject_id,
        "date": calendar::format_date(date),
        "status": status.as_str(),
        "count": count
    }))
}

fn attendance_bulk_import(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let status = parse_status_param(&get_required_str(params, "status")?)?;
    let Some(dates_json) = params.get("dates").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing dates".to_string()));
    };

    let mut dates = Vec::with_capacity(dates_json.len());
    for v in dates_json {
        let Some(raw) = v.as_str() else {
            return Err(HandlerErr::bad_params("dates entries must be strings".to_string()));
        };
        dates.push(parse_date_param(raw)?);
    }

    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    // One record per (subject, date), count fixed at 1. Re-importing a
    // date replaces its record instead of stacking a duplicate.
    for date in &dates {
        upsert_record(&tx, &subject_id, *date, status, (None, None), 1)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "imported": dates.len() }))
}

fn attendance_clear(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let status_raw = get_required_str(params, "status")?;

    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }

    let result = if status_raw.trim().eq_ignore_ascii_case("all") {
        conn.execute(
            "DELETE FROM attendance_records WHERE subject_id = ?",
            [&subject_id],
        )
    } else {
        let status = parse_status_param(&status_raw)?;
        conn.execute(
            "DELETE FROM attendance_records WHERE subject_id = ? AND status = ?",
            (&subject_id, status.as_str()),
        )
    };
    let deleted = result.map_err(|e| HandlerErr {
        code: "db_delete_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_records" })),
    })?;

    Ok(json!({ "deleted": deleted }))
}

fn attendance_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let date = parse_date_param(&get_required_str(params, "date")?)?;

    let deleted = conn
        .execute(
            "DELETE FROM attendance_records WHERE subject_id = ? AND date = ?",
            (&subject_id, calendar::format_date(date)),
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_records" })),
        })?;
    if deleted == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "attendance record not found".to_string(),
            details: None,
        });
    }

    Ok(json!({ "ok": true }))
}

fn attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_filter = params
        .get("subjectId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut stmt = conn
        .prepare(
            "SELECT id, name FROM subjects
             WHERE (?1 IS NULL OR id = ?1)
             ORDER BY name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let subjects = stmt
        .query_map([&subject_filter], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    if subject_filter.is_some() && subjects.is_empty() {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }

    let mut summaries = Vec::with_capacity(subjects.len());
    for (id, name) in subjects {
        let agg = calc::aggregate(load_units(conn, &id)?);
        summaries.push(json!({
            "subjectId": id,
            "subjectName": name,
            "aggregate": agg,
            "classesNeededFor75": calc::classes_needed_for_threshold(
                agg.present_units,
                agg.total_units
            )
        }));
    }

    Ok(json!({ "subjects": summaries }))
}

fn dispatch<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: Fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(dispatch(state, req, attendance_list)),
        "attendance.mark" => Some(dispatch(state, req, attendance_mark)),
        "attendance.bulkImport" => Some(dispatch(state, req, attendance_bulk_import)),
        "attendance.clear" => Some(dispatch(state, req, attendance_clear)),
        "attendance.delete" => Some(dispatch(state, req, attendance_delete)),
        "attendance.summary" => Some(dispatch(state, req, attendance_summary)),
        _ => None,
    }
}
