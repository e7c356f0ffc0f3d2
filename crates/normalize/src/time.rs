//! Feed time handling. Feed instants without an offset are UTC.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::NormalizeError;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// HH:MM with an optional trailing :SS that is ignored
static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}):([0-5]\d)(?::[0-5]\d)?$").expect("static duration regex"));

pub fn parse_start_time(raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(NormalizeError::Invalid { field: "start time", value: raw.to_string(), reason: "unrecognised timestamp".into() })
}

/// `YYYY-MM-DDTHH:mm:ss.SSSZ`
pub fn format_instant(t: &DateTime<Utc>) -> String { t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string() }

/// `HH:MM` to whole seconds.
pub fn parse_duration(raw: &str) -> Result<u64, NormalizeError> {
    let caps = DURATION_RE.captures(raw.trim()).ok_or_else(|| NormalizeError::Invalid {
        field: "duration",
        value: raw.to_string(),
        reason: "expected HH:MM".into(),
    })?;
    let hours: u64 = caps[1].parse().unwrap_or(0);
    let minutes: u64 = caps[2].parse().unwrap_or(0);
    Ok(hours * 3600 + minutes * 60)
}

/// `None` when the result falls outside the representable calendar.
pub fn add_days(t: &DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    t.checked_add_signed(Duration::days(i64::from(days)))
}

/// True when the event started more than `max_age` before `now`. A cutoff
/// before the representable calendar means nothing is stale.
pub fn is_stale(start: &DateTime<Utc>, now: &DateTime<Utc>, max_age: Duration) -> bool {
    now.checked_sub_signed(max_age).map(|cutoff| *start < cutoff).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offset_and_naive_times_as_utc() {
        let a = parse_start_time("2024-01-01T00:00:00.000Z").unwrap();
        let b = parse_start_time("2024-01-01 00:00:00").unwrap();
        let c = parse_start_time("2024-01-01T01:00:00+01:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_start_time("yesterday").is_err());
    }

    #[test]
    fn availability_window_formats_with_millis_and_z() {
        let start = parse_start_time("2024-01-01T00:00:00.000Z").unwrap();
        assert_eq!(format_instant(&add_days(&start, 7).unwrap()), "2024-01-08T00:00:00.000Z");
        assert_eq!(add_days(&start, u32::MAX), None);
        assert_eq!(format_instant(&start), "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn duration_is_hours_and_minutes_in_seconds() {
        assert_eq!(parse_duration("01:30").unwrap(), 5400);
        assert_eq!(parse_duration("00:05").unwrap(), 300);
        assert_eq!(parse_duration("02:00:59").unwrap(), 7200);
        assert!(parse_duration("1h30").is_err());
        assert!(parse_duration("01:75").is_err());
    }

    #[test]
    fn staleness_is_relative_to_now() {
        let now = parse_start_time("2024-01-02T12:00:00Z").unwrap();
        let old = parse_start_time("2024-01-01T11:59:59Z").unwrap();
        let recent = parse_start_time("2024-01-01T12:00:01Z").unwrap();
        assert!(is_stale(&old, &now, Duration::hours(24)));
        assert!(!is_stale(&recent, &now, Duration::hours(24)));
        // a huge window never underflows
        assert!(!is_stale(&old, &now, Duration::hours(i64::from(u32::MAX))));
    }
}
