use serde::Serialize;

/// Attendance status as stored on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Present,
    Absent,
    Holiday,
}

impl Status {
    pub fn parse(raw: &str) -> Option<Status> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Status::Present),
            "absent" => Some(Status::Absent),
            "holiday" => Some(Status::Holiday),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Present => "present",
            Status::Absent => "absent",
            Status::Holiday => "holiday",
        }
    }
}

/// One observation's contribution: its status and how many periods it
/// represents. Bulk-imported rows carry count 1; single marks carry the
/// number of timetable periods on that weekday.
#[derive(Debug, Clone, Copy)]
pub struct RecordUnits {
    pub status: Status,
    pub count: i64,
}

/// 1-decimal rounding: `floor(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub present_units: i64,
    pub total_units: i64,
    pub percentage: f64,
}

impl Aggregate {
    pub fn empty() -> Aggregate {
        Aggregate {
            present_units: 0,
            total_units: 0,
            percentage: 0.0,
        }
    }
}

/// Folds attendance records into (present units, total units, percentage).
///
/// Holiday records never contribute. Everything else adds its count to the
/// total; present records also add it to the attended side. A stored count
/// of zero or less weighs 1 so a bad row can never shrink the totals.
/// The fold is a plain commutative sum, so input order is irrelevant.
pub fn aggregate<I>(records: I) -> Aggregate
where
    I: IntoIterator<Item = RecordUnits>,
{
    let mut present_units: i64 = 0;
    let mut total_units: i64 = 0;

    for r in records {
        if r.status == Status::Holiday {
            continue;
        }
        let units = if r.count > 0 { r.count } else { 1 };
        total_units += units;
        if r.status == Status::Present {
            present_units += units;
        }
    }

    let percentage = if total_units > 0 {
        round_off_1_decimal(100.0 * present_units as f64 / total_units as f64)
    } else {
        0.0
    };

    Aggregate {
        present_units,
        total_units,
        percentage,
    }
}

/// Classes that must all be attended, back to back, to pull the aggregate
/// up to 75%: solving `(attended + x) / (total + x) = 0.75` gives
/// `x = (0.75*total - attended) / 0.25`, ceiled and floored at zero.
pub fn classes_needed_for_threshold(present_units: i64, total_units: i64) -> i64 {
    if total_units <= 0 {
        return 0;
    }
    let needed = ((0.75 * total_units as f64) - present_units as f64) / 0.25;
    needed.ceil().max(0.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(status: Status, count: i64) -> RecordUnits {
        RecordUnits { status, count }
    }

    #[test]
    fn round_off_1_decimal_cases() {
        assert_eq!(round_off_1_decimal(0.0), 0.0);
        assert_eq!(round_off_1_decimal(3.54), 3.5);
        assert_eq!(round_off_1_decimal(3.55), 3.6);
        assert_eq!(round_off_1_decimal(74.9999), 75.0);
    }

    #[test]
    fn aggregate_empty_is_zero() {
        let agg = aggregate(std::iter::empty());
        assert_eq!(agg, Aggregate::empty());
    }

    #[test]
    fn aggregate_excludes_holiday_records() {
        let records = vec![
            rec(Status::Present, 3),
            rec(Status::Absent, 1),
            rec(Status::Holiday, 5),
        ];
        let agg = aggregate(records.iter().copied());
        assert_eq!(agg.total_units, 4);
        assert_eq!(agg.present_units, 3);
        assert_eq!(agg.percentage, 75.0);

        // Piling on more holidays must not move anything.
        let mut with_more = records.clone();
        with_more.push(rec(Status::Holiday, 99));
        with_more.push(rec(Status::Holiday, 1));
        assert_eq!(aggregate(with_more), agg);
    }

    #[test]
    fn aggregate_is_order_independent() {
        let forward = vec![
            rec(Status::Present, 2),
            rec(Status::Absent, 1),
            rec(Status::Present, 1),
            rec(Status::Holiday, 4),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(aggregate(forward), aggregate(reversed));
    }

    #[test]
    fn non_positive_counts_weigh_one() {
        let agg = aggregate(vec![rec(Status::Present, 0), rec(Status::Absent, -7)]);
        assert_eq!(agg.total_units, 2);
        assert_eq!(agg.present_units, 1);
        assert_eq!(agg.percentage, 50.0);
    }

    #[test]
    fn classes_needed_from_fifty_percent() {
        // attended=20, total=40: ceil((0.75*40 - 20) / 0.25) = 40.
        assert_eq!(classes_needed_for_threshold(20, 40), 40);
    }

    #[test]
    fn classes_needed_floors_at_zero() {
        assert_eq!(classes_needed_for_threshold(30, 40), 0);
        assert_eq!(classes_needed_for_threshold(40, 40), 0);
        assert_eq!(classes_needed_for_threshold(0, 0), 0);
    }

    #[test]
    fn classes_needed_just_below_threshold() {
        // attended=74, total=100: ceil((75 - 74) / 0.25) = 4.
        assert_eq!(classes_needed_for_threshold(74, 100), 4);
    }
}
