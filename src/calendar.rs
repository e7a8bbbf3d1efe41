use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Cells in the month display grid: 6 full weeks, Sunday-anchored.
pub const GRID_CELLS: i64 = 42;

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Lowercase English weekday name, the form the wire and the timetable
/// tables use.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "sunday",
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
    }
}

pub fn parse_weekday(raw: &str) -> Option<Weekday> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sunday" => Some(Weekday::Sun),
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        _ => None,
    }
}

/// One cell of the month grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDay {
    pub date: NaiveDate,
    pub in_month: bool,
}

/// The 42-cell display grid for a month: trailing days of the previous
/// month pad before day 1 so the grid opens on a Sunday, leading days of
/// the next month pad after the last day so every grid has 6 rows.
/// Returns None for an invalid year/month pair.
pub fn month_grid(year: i32, month: u32) -> Option<Vec<GridDay>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let lead = first.weekday().num_days_from_sunday() as i64;
    let start = first - Duration::days(lead);

    let cells = (0..GRID_CELLS)
        .map(|offset| {
            let date = start + Duration::days(offset);
            GridDay {
                date,
                in_month: date.year() == year && date.month() == month,
            }
        })
        .collect();
    Some(cells)
}

/// Every date from `start` through `end`, inclusive. Empty when the range
/// is inverted.
pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        days.push(current);
        current += Duration::days(1);
    }
    days
}
