//! Time formatting for console output.
//!
//! Durations are shown as `HH:MM:SS`, timestamps as `YYYY-MM-DD HH:MM:SS`.
//! Hours are not wrapped at 24.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::time::Duration;

/// Format of timestamps on the command line, both ways.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

pub fn format_datetime(at: &DateTime<Local>) -> String {
    at.format(DATETIME_FORMAT).to_string()
}

/// Parses a local timestamp in [`DATETIME_FORMAT`]. Times skipped by a DST
/// change yield `None`; ambiguous ones resolve to the earlier instant.
pub fn parse_datetime(text: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), DATETIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::ZERO), "00:00:00");
        assert_eq!(format_duration(&Duration::from_secs(170)), "00:02:50");
        assert_eq!(format_duration(&Duration::from_secs(14400)), "04:00:00");
        assert_eq!(format_duration(&Duration::from_secs(90_061)), "25:01:01");
        assert_eq!(format_duration(&Duration::from_millis(1999)), "00:00:01");
    }

    #[test]
    fn test_parse_datetime() {
        let at = parse_datetime(" 2024-01-31 08:59:59 ").unwrap();
        assert_eq!((at.year(), at.month(), at.day()), (2024, 1, 31));
        assert_eq!((at.hour(), at.minute(), at.second()), (8, 59, 59));
        assert_eq!(format_datetime(&at), "2024-01-31 08:59:59");

        assert!(parse_datetime("2024-01-31").is_none());
        assert!(parse_datetime("yesterday").is_none());
    }
}
