//! Time axes: deriving timestamps from source rows and stepping forward.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::table::Cell;

pub const DS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Yearly,
    Monthly,
    Hourly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Yearly => "yearly",
            Frequency::Monthly => "monthly",
            Frequency::Hourly => "hourly",
        }
    }

    /// The `periods` timestamps following `last`. Monthly and yearly
    /// timestamps land on period ends (last day of the month, December 31st)
    /// and keep the time of day of `last`; hourly ones step by one hour.
    pub fn future(&self, last: NaiveDateTime, periods: usize) -> Vec<NaiveDateTime> {
        let (mut year, mut month) = match self {
            Frequency::Hourly => {
                return (1..=periods as i64)
                    .map_while(|k| last.checked_add_signed(Duration::hours(k)))
                    .collect();
            }
            Frequency::Monthly => (last.year(), last.month()),
            Frequency::Yearly => (last.year(), 12),
        };
        let mut out = Vec::with_capacity(periods);
        while out.len() < periods {
            let Some(end) = month_end(year, month) else {
                break;
            };
            let ts = end.and_time(last.time());
            if ts > last {
                out.push(ts);
            }
            match self {
                Frequency::Monthly if month == 12 => {
                    year += 1;
                    month = 1;
                }
                Frequency::Monthly => month += 1,
                _ => year += 1,
            }
        }
        out
    }
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1)?, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// First run of at least `len` ASCII digits, truncated to `len`.
fn digit_run(s: &str, len: usize) -> Option<&str> {
    let bytes = s.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end - start >= len {
            return Some(&s[start..start + len]);
        }
        start = end;
    }
    None
}

/// Date embedded in a batch identifier: `YYYYMMDD` first, then `YYMMDD`.
/// Only the first matching pattern is tried; an impossible date is `None`.
pub fn extract_batch_date(batch: &str) -> Option<NaiveDateTime> {
    let parsed = if let Some(digits) = digit_run(batch, 8) {
        NaiveDate::parse_from_str(digits, "%Y%m%d")
    } else {
        NaiveDate::parse_from_str(digit_run(batch, 6)?, "%y%m%d")
    };
    parsed.ok().and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// January 1st of the year held in `cell`.
pub fn year_start(cell: &Cell) -> Option<NaiveDateTime> {
    let year = match cell {
        Cell::Int(y) => i32::try_from(*y).ok()?,
        Cell::Real(y) if y.fract() == 0.0 => *y as i32,
        Cell::Text(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)
}

/// `anchor` plus a fractional number of hours, to the millisecond.
pub fn offset_hours(anchor: NaiveDateTime, hours: f64) -> Option<NaiveDateTime> {
    if !hours.is_finite() {
        return None;
    }
    let millis = (hours * 3_600_000.0).round();
    if millis.abs() > i64::MAX as f64 / 2.0 {
        return None;
    }
    anchor.checked_add_signed(Duration::milliseconds(millis as i64))
}

/// Truncate to the start of the hour.
pub fn floor_hour(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

pub fn format_ds(ts: NaiveDateTime) -> String {
    ts.format(DS_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, ISO `T`-separated, or a bare date.
pub fn parse_ds(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn eight_digit_date_wins() {
        assert_eq!(extract_batch_date("GFP-20210315-A"), Some(dt(2021, 3, 15, 0)));
        // leftmost run long enough wins; shorter runs are skipped
        assert_eq!(extract_batch_date("R7_1234567_20200102"), Some(dt(2020, 1, 2, 0)));
    }

    #[test]
    fn six_digit_date_uses_two_digit_year() {
        assert_eq!(extract_batch_date("B210315"), Some(dt(2021, 3, 15, 0)));
        assert_eq!(extract_batch_date("lot 991231 x"), Some(dt(1999, 12, 31, 0)));
    }

    #[test]
    fn no_date_is_missing() {
        assert_eq!(extract_batch_date("Batch-7"), None);
        assert_eq!(extract_batch_date("12345"), None);
        assert_eq!(extract_batch_date(""), None);
    }

    #[test]
    fn impossible_date_is_missing() {
        assert_eq!(extract_batch_date("GFP-20211345"), None);
        // an 8-digit run that fails does not fall back to the 6-digit pattern
        assert_eq!(extract_batch_date("99999999"), None);
    }

    #[test]
    fn year_cells() {
        assert_eq!(year_start(&Cell::Int(2019)), Some(dt(2019, 1, 1, 0)));
        assert_eq!(year_start(&Cell::Real(2020.0)), Some(dt(2020, 1, 1, 0)));
        assert_eq!(year_start(&Cell::Text("2021".into())), Some(dt(2021, 1, 1, 0)));
        assert_eq!(year_start(&Cell::Real(2020.5)), None);
        assert_eq!(year_start(&Cell::Null), None);
    }

    #[test]
    fn yearly_future_lands_on_year_end() {
        let years = Frequency::Yearly.future(dt(2023, 1, 1, 0), 5);
        assert_eq!(years.len(), 5);
        assert_eq!(years[0], dt(2023, 12, 31, 0));
        assert_eq!(years[4], dt(2027, 12, 31, 0));

        // already on the year end: the next one starts the horizon
        let years = Frequency::Yearly.future(dt(2023, 12, 31, 0), 2);
        assert_eq!(years, vec![dt(2024, 12, 31, 0), dt(2025, 12, 31, 0)]);
    }

    #[test]
    fn monthly_future_lands_on_month_end() {
        let months = Frequency::Monthly.future(dt(2023, 3, 20, 0), 3);
        assert_eq!(months, vec![dt(2023, 3, 31, 0), dt(2023, 4, 30, 0), dt(2023, 5, 31, 0)]);

        let months = Frequency::Monthly.future(dt(2023, 12, 31, 0), 2);
        assert_eq!(months, vec![dt(2024, 1, 31, 0), dt(2024, 2, 29, 0)]);
    }

    #[test]
    fn hourly_future_steps_one_hour() {
        let hours = Frequency::Hourly.future(dt(2023, 1, 1, 23), 24);
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[0], dt(2023, 1, 2, 0));
        assert_eq!(hours[23], dt(2023, 1, 2, 23));
        assert!(Frequency::Monthly.future(dt(2023, 1, 1, 0), 0).is_empty());
    }

    #[test]
    fn hour_offsets_are_fractional() {
        let anchor = dt(2024, 5, 1, 10);
        let t = offset_hours(anchor, 1.5).unwrap();
        assert_eq!(format_ds(t), "2024-05-01 11:30:00");
        assert_eq!(offset_hours(anchor, f64::NAN), None);
    }

    #[test]
    fn floor_hour_drops_minutes() {
        let t = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_milli_opt(10, 42, 7, 300)
            .unwrap();
        assert_eq!(floor_hour(t), dt(2024, 5, 1, 10));
    }

    #[test]
    fn ds_round_trip_and_variants() {
        let t = dt(2025, 2, 3, 4);
        assert_eq!(parse_ds(&format_ds(t)), Some(t));
        assert_eq!(parse_ds("2025-02-03T04:00:00"), Some(t));
        assert_eq!(parse_ds("2025-02-03"), Some(dt(2025, 2, 3, 0)));
        assert_eq!(parse_ds("soon"), None);
    }
}
