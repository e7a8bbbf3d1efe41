use crate::calc::Aggregate;
use crate::calendar;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::BTreeMap;

/// What a declared exception date means for the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayKind {
    /// College closed: the class does not happen at all.
    Holiday,
    /// Personal leave: the class happens and is counted as a miss.
    Leave,
}

/// Immutable per-request exception calendar. A date carries at most one
/// kind; conflicting input is rejected at construction instead of being
/// resolved by whichever set was edited last.
#[derive(Debug, Clone, Default)]
pub struct ExceptionCalendar {
    days: BTreeMap<NaiveDate, DayKind>,
}

impl ExceptionCalendar {
    /// Builds the calendar from the two declared date sets. Returns the
    /// first date found in both sets as the error.
    pub fn from_sets(holidays: &[NaiveDate], leaves: &[NaiveDate]) -> Result<Self, NaiveDate> {
        let mut days = BTreeMap::new();
        for &date in holidays {
            days.insert(date, DayKind::Holiday);
        }
        for &date in leaves {
            if days.get(&date) == Some(&DayKind::Holiday) {
                return Err(date);
            }
            days.insert(date, DayKind::Leave);
        }
        Ok(ExceptionCalendar { days })
    }

    pub fn kind_for(&self, date: NaiveDate) -> Option<DayKind> {
        self.days.get(&date).copied()
    }

    pub fn holiday_count(&self) -> usize {
        self.days.values().filter(|k| **k == DayKind::Holiday).count()
    }

    pub fn leave_count(&self) -> usize {
        self.days.values().filter(|k| **k == DayKind::Leave).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub period_total: i64,
    pub period_attended: i64,
    pub future_total: i64,
    pub future_attended: i64,
    pub current_percentage: f64,
    pub future_percentage: f64,
    pub change: f64,
}

/// Projects a subject's attendance over every date strictly after `from`
/// through `to` inclusive, assuming presence on every class day that is
/// neither a declared holiday nor a declared leave.
///
/// `slot_weekdays` lists the weekday of each of the subject's timetable
/// slots (with repetition); the number of matches for a date's weekday is
/// how many classes happen that day. Dates with no classes are skipped.
pub fn project(
    slot_weekdays: &[Weekday],
    current: Aggregate,
    from: NaiveDate,
    to: NaiveDate,
    exceptions: &ExceptionCalendar,
) -> Projection {
    let mut period_total: i64 = 0;
    let mut period_attended: i64 = 0;

    for date in calendar::days_in_range(from + Duration::days(1), to) {
        let classes_on_day = slot_weekdays
            .iter()
            .filter(|d| **d == date.weekday())
            .count() as i64;
        if classes_on_day == 0 {
            continue;
        }
        match exceptions.kind_for(date) {
            Some(DayKind::Holiday) => {}
            Some(DayKind::Leave) => {
                period_total += classes_on_day;
            }
            None => {
                period_total += classes_on_day;
                period_attended += classes_on_day;
            }
        }
    }

    let current_percentage = if current.total_units > 0 {
        100.0 * current.present_units as f64 / current.total_units as f64
    } else {
        0.0
    };
    let future_total = current.total_units + period_total;
    let future_attended = current.present_units + period_attended;
    let future_percentage = if future_total > 0 {
        100.0 * future_attended as f64 / future_total as f64
    } else {
        0.0
    };

    Projection {
        period_total,
        period_attended,
        future_total,
        future_attended,
        current_percentage,
        future_percentage,
        change: future_percentage - current_percentage,
    }
}
