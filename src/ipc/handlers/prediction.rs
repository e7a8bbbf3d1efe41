use crate::calc::{self, RecordUnits, Status};
use crate::calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::predict::{self, ExceptionCalendar};
use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::Connection;
use serde_json::json;

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

    fn db(e: impl ToString) -> HandlerErr {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn parse_date_param(raw: &str) -> Result<NaiveDate, HandlerErr> {
    calendar::parse_date(raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("invalid date: {} (want YYYY-MM-DD)", raw)))
}

fn parse_date_list(
    params: &serde_json::Value,
    key: &str,
) -> Result<Vec<NaiveDate>, HandlerErr> {
    let Some(list) = params.get(key) else {
        return Ok(Vec::new());
    };
    let Some(list) = list.as_array() else {
        return Err(HandlerErr::bad_params(format!("{} must be an array of dates", key)));
    };
    let mut dates = Vec::with_capacity(list.len());
    for v in list {
        let Some(raw) = v.as_str() else {
            return Err(HandlerErr::bad_params(format!("{} entries must be strings", key)));
        };
        dates.push(parse_date_param(raw)?);
    }
    Ok(dates)
}

struct SubjectRow {
    id: String,
    name: String,
    color: String,
}

fn load_subjects(conn: &Connection) -> Result<Vec<SubjectRow>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, color FROM subjects ORDER BY name")
        .map_err(HandlerErr::db)?;
    stmt.query_map([], |r| {
        Ok(SubjectRow {
            id: r.get(0)?,
            name: r.get(1)?,
            color: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn load_units(conn: &Connection, subject_id: &str) -> Result<Vec<RecordUnits>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT status, count FROM attendance_records WHERE subject_id = ?")
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([subject_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(rows
        .into_iter()
        .filter_map(|(status, count)| {
            Status::parse(&status).map(|status| RecordUnits { status, count })
        })
        .collect())
}

fn load_slot_weekdays(conn: &Connection, subject_id: &str) -> Result<Vec<Weekday>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT day_of_week FROM timetable_slots WHERE subject_id = ?")
        .map_err(HandlerErr::db)?;
    let days = stmt
        .query_map([subject_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(days
        .iter()
        .filter_map(|d| calendar::parse_weekday(d))
        .collect())
}

fn predict_range(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let to_raw = params
        .get("toDate")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing toDate"))?;
    let to = parse_date_param(to_raw)?;
    let from = match params.get("fromDate").and_then(|v| v.as_str()) {
        Some(raw) => parse_date_param(raw)?,
        None => chrono::Local::now().date_naive(),
    };
    if to <= from {
        return Err(HandlerErr::bad_params(
            "toDate must be in the future".to_string(),
        ));
    }

    let holidays = parse_date_list(params, "holidays")?;
    let leaves = parse_date_list(params, "leaves")?;
    let exceptions = ExceptionCalendar::from_sets(&holidays, &leaves).map_err(|date| HandlerErr {
        code: "bad_params",
        message: "a date cannot be both a holiday and a leave".to_string(),
        details: Some(json!({ "date": calendar::format_date(date) })),
    })?;

    let mut predictions = Vec::new();
    for subject in load_subjects(conn)? {
        let current = calc::aggregate(load_units(conn, &subject.id)?);
        let slot_weekdays = load_slot_weekdays(conn, &subject.id)?;
        let projection = predict::project(&slot_weekdays, current, from, to, &exceptions);
        predictions.push(json!({
            "subjectId": subject.id,
            "subjectName": subject.name,
            "color": subject.color,
            "current": current,
            "projection": projection
        }));
    }

    Ok(json!({
        "fromDate": calendar::format_date(from),
        "toDate": calendar::format_date(to),
        "holidayCount": exceptions.holiday_count(),
        "leaveCount": exceptions.leave_count(),
        "predictions": predictions
    }))
}

fn predict_threshold(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let upcoming = params
        .get("upcomingClasses")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if upcoming < 0 {
        return Err(HandlerErr::bad_params(
            "upcomingClasses must not be negative".to_string(),
        ));
    }

    let mut subjects = Vec::new();
    for subject in load_subjects(conn)? {
        let agg = calc::aggregate(load_units(conn, &subject.id)?);
        let bounded_total = agg.total_units + upcoming;
        let all_present = if bounded_total > 0 {
            100.0 * (agg.present_units + upcoming) as f64 / bounded_total as f64
        } else {
            0.0
        };
        let all_absent = if bounded_total > 0 {
            100.0 * agg.present_units as f64 / bounded_total as f64
        } else {
            0.0
        };
        subjects.push(json!({
            "subjectId": subject.id,
            "subjectName": subject.name,
            "aggregate": agg,
            "classesNeededFor75": calc::classes_needed_for_threshold(
                agg.present_units,
                agg.total_units
            ),
            "allPresentPercentage": all_present,
            "allAbsentPercentage": all_absent
        }));
    }

    Ok(json!({ "upcomingClasses": upcoming, "subjects": subjects }))
}

fn calendar_month_grid(
    _conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing year"))?;
    let month = params
        .get("month")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing month"))?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr::bad_params(
            "month must be between 1 and 12".to_string(),
        ));
    }

    let grid = calendar::month_grid(year as i32, month as u32)
        .ok_or_else(|| HandlerErr::bad_params("invalid year/month".to_string()))?;
    let days: Vec<serde_json::Value> = grid
        .iter()
        .map(|cell| {
            json!({
                "date": calendar::format_date(cell.date),
                "weekday": calendar::weekday_name(cell.date.weekday()),
                "inMonth": cell.in_month
            })
        })
        .collect();

    Ok(json!({ "year": year, "month": month, "days": days }))
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
        "predict.range" => Some(dispatch(state, req, predict_range)),
        "predict.threshold" => Some(dispatch(state, req, predict_threshold)),
        "calendar.monthGrid" => Some(dispatch(state, req, calendar_month_grid)),
        _ => None,
    }
}
