//! Daily reset predicate.
//!
//! A [`DailyPredicate`] is parsed from a `"day/HH:MM"` spec and answers one
//! question: at what wall-clock time does `HH:MM` next occur strictly after
//! a given instant? Timers use it to clear overdue time once per day.
//!
//! Hour and minute are only required to parse as decimal integers.
//! Out-of-range values such as `day/25:00` are accepted and follow the
//! calendar arithmetic (25:00 is 01:00 of the following day).

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DAY_PREFIX: &str = "day/";

/// Errors produced while parsing a predicate spec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    #[error("unsupported reset predicate '{0}', expected day/HH:MM")]
    UnsupportedForm(String),
    #[error("invalid number '{value}' in reset predicate '{spec}'")]
    InvalidNumber { spec: String, value: String },
}

/// Time of day at which a daily reset happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DailyPredicate {
    hour: i32,
    minute: i32,
}

impl DailyPredicate {
    pub fn new(hour: i32, minute: i32) -> Self {
        Self { hour, minute }
    }

    pub fn hour(&self) -> i32 {
        self.hour
    }

    pub fn minute(&self) -> i32 {
        self.minute
    }

    /// Parses an optional spec. An empty spec means "no daily reset".
    pub fn parse_optional(spec: &str) -> Result<Option<Self>, PredicateError> {
        if spec.trim().is_empty() {
            Ok(None)
        } else {
            spec.parse().map(Some)
        }
    }

    /// Next time `HH:MM` occurs strictly after `after`, in `after`'s zone.
    ///
    /// If the time of day has passed, or equals the current one, the next
    /// day is used. Month and year rollover follow the Gregorian calendar,
    /// including leap years.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> DateTime<Tz> {
        let local = after.naive_local();
        let mut year = local.year();
        let mut month0 = local.month0();
        let mut day = local.day();

        if (self.hour, self.minute) <= (local.hour() as i32, local.minute() as i32) {
            day += 1;
        }
        if day > days_in_month(year, month0) {
            day = 1;
            month0 += 1;
        }
        if month0 > 11 {
            month0 = 0;
            year += 1;
        }

        let tz = after.timezone();
        let mut target = self.target(year, month0, day);
        // Negative hours or minutes can land days before `after`; skip the
        // whole days at once so only the last step remains.
        if target <= local {
            let behind = (local - target).num_days();
            target = target.checked_add_signed(Duration::days(behind)).unwrap_or(local);
        }

        let mut candidate = resolve(&tz, target);
        while candidate <= *after {
            target += Duration::days(1);
            candidate = resolve(&tz, target);
        }
        candidate
    }

    /// `HH:MM` past midnight of the given day, in local calendar time.
    fn target(&self, year: i32, month0: u32, day: u32) -> NaiveDateTime {
        let midnight = NaiveDate::from_ymd_opt(year, month0 + 1, day)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        let offset = Duration::hours(i64::from(self.hour)) + Duration::minutes(i64::from(self.minute));
        midnight.checked_add_signed(offset).unwrap_or(midnight)
    }
}

/// Resolves a local calendar time in `tz`.
///
/// Inside a DST gap the local time does not exist; move past the gap the
/// way mktime does.
fn resolve<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut shifted = naive;
    for _ in 0..4 {
        if let Some(resolved) = tz.from_local_datetime(&shifted).earliest() {
            return resolved;
        }
        shifted += Duration::minutes(30);
    }
    tz.from_utc_datetime(&naive)
}

/// Days in a 0-indexed month.
pub fn days_in_month(year: i32, month0: u32) -> u32 {
    match month0 {
        0 | 2 | 4 | 6 | 7 | 9 | 11 => 31,
        3 | 5 | 8 | 10 => 30,
        _ if is_leap_year(year) => 29,
        _ => 28,
    }
}

pub fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

impl FromStr for DailyPredicate {
    type Err = PredicateError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let body = spec
            .trim()
            .strip_prefix(DAY_PREFIX)
            .ok_or_else(|| PredicateError::UnsupportedForm(spec.to_string()))?;
        let (hour, minute) = body
            .split_once(':')
            .ok_or_else(|| PredicateError::UnsupportedForm(spec.to_string()))?;

        let number = |value: &str| {
            value.trim().parse::<i32>().map_err(|_| PredicateError::InvalidNumber {
                spec: spec.to_string(),
                value: value.to_string(),
            })
        };
        Ok(Self::new(number(hour)?, number(minute)?))
    }
}

impl fmt::Display for DailyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{:02}", DAY_PREFIX, self.hour, self.minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_same_day_before_time() {
        let pred: DailyPredicate = "day/09:00".parse().unwrap();
        assert_eq!(pred.next_after(&at(2024, 5, 14, 8, 59, 59)), at(2024, 5, 14, 9, 0, 0));
    }

    #[test]
    fn test_next_day_when_passed_or_equal() {
        let pred: DailyPredicate = "day/09:00".parse().unwrap();
        assert_eq!(pred.next_after(&at(2024, 5, 14, 9, 0, 1)), at(2024, 5, 15, 9, 0, 0));
        assert_eq!(pred.next_after(&at(2024, 5, 14, 9, 0, 0)), at(2024, 5, 15, 9, 0, 0));
    }

    #[test]
    fn test_month_and_year_rollover() {
        let pred = DailyPredicate::new(4, 0);
        assert_eq!(pred.next_after(&at(2023, 1, 31, 12, 0, 0)), at(2023, 2, 1, 4, 0, 0));
        assert_eq!(pred.next_after(&at(2023, 12, 31, 5, 0, 0)), at(2024, 1, 1, 4, 0, 0));
        assert_eq!(pred.next_after(&at(2023, 4, 30, 5, 0, 0)), at(2023, 5, 1, 4, 0, 0));
    }

    #[test]
    fn test_february_leap_years() {
        let pred = DailyPredicate::new(4, 0);
        assert_eq!(pred.next_after(&at(2024, 2, 28, 5, 0, 0)), at(2024, 2, 29, 4, 0, 0));
        assert_eq!(pred.next_after(&at(2024, 2, 29, 5, 0, 0)), at(2024, 3, 1, 4, 0, 0));
        assert_eq!(pred.next_after(&at(2023, 2, 28, 5, 0, 0)), at(2023, 3, 1, 4, 0, 0));
        assert_eq!(pred.next_after(&at(1900, 2, 28, 5, 0, 0)), at(1900, 3, 1, 4, 0, 0));
        assert_eq!(pred.next_after(&at(2000, 2, 28, 5, 0, 0)), at(2000, 2, 29, 4, 0, 0));
    }

    #[test]
    fn test_out_of_range_values_are_accepted() {
        let pred: DailyPredicate = "day/25:00".parse().unwrap();
        assert_eq!(pred.hour(), 25);
        assert_eq!(pred.next_after(&at(2024, 5, 14, 8, 0, 0)), at(2024, 5, 15, 1, 0, 0));

        let pred: DailyPredicate = "day/-1:00".parse().unwrap();
        let next = pred.next_after(&at(2024, 5, 14, 23, 30, 0));
        assert!(next > at(2024, 5, 14, 23, 30, 0));
    }

    #[test]
    fn test_huge_negative_hours_resolve_without_walking_every_day() {
        let pred: DailyPredicate = "day/-2000000000:00".parse().unwrap();
        let after = at(2024, 3, 5, 10, 0, 0);
        let started = std::time::Instant::now();
        let next = pred.next_after(&after);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        // -2000000000 h past midnight falls on a 16:00.
        assert_eq!(next, at(2024, 3, 5, 16, 0, 0));
        assert_eq!(pred.next_after(&at(2024, 3, 5, 16, 0, 0)), at(2024, 3, 6, 16, 0, 0));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("week/4:00".parse::<DailyPredicate>(), Err(PredicateError::UnsupportedForm(_))));
        assert!(matches!("day/4".parse::<DailyPredicate>(), Err(PredicateError::UnsupportedForm(_))));
        assert!(matches!("day/x:00".parse::<DailyPredicate>(), Err(PredicateError::InvalidNumber { .. })));
        assert_eq!(DailyPredicate::parse_optional("  "), Ok(None));
        assert_eq!(DailyPredicate::new(4, 0).to_string(), "day/4:00");
    }
}
