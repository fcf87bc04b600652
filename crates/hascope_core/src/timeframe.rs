//! Timeframe resolution.
//!
//! Parses compact duration tokens ("30m", "24h", "7d", "2w") into absolute
//! UTC windows. The `m` suffix always means minutes, never months; month
//! support is deliberately absent because the single-letter grammar cannot
//! distinguish the two readings.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, CoreResult};

static TIMEFRAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)([mhdw])$").expect("timeframe grammar is valid"));

/// An absolute, timezone-normalized time window. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window from explicit bounds. Bounds arriving reversed are a
    /// caller bug; they are normalized rather than panicking.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// Window covering the last `span`, ending at the current wall clock.
    /// Spans reaching past the representable range clamp to it.
    pub fn ending_now(span: Duration) -> Self {
        let end = Utc::now();
        let start = end.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }

    /// Symmetric window of half-width `half` centered on `center`. Used by
    /// the correlator to look both before and after an error.
    pub fn around(center: DateTime<Utc>, half: Duration) -> Self {
        let start = center.checked_sub_signed(half).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = center.checked_add_signed(half).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { start, end }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Parse a timeframe token into a duration.
///
/// Grammar: `^(\d+)([mhdw])$`, case-insensitive, whitespace-trimmed.
/// Zero durations and fractional values are rejected.
pub fn parse_timeframe(token: &str) -> CoreResult<Duration> {
    let normalized = token.trim().to_lowercase();
    let caps = TIMEFRAME_RE
        .captures(&normalized)
        .ok_or_else(|| CoreError::InvalidTimeframe(token.to_string()))?;

    let count: i64 = caps[1]
        .parse()
        .map_err(|_| CoreError::InvalidTimeframe(token.to_string()))?;
    if count == 0 {
        return Err(CoreError::InvalidTimeframe(token.to_string()));
    }

    // The checked constructors reject counts whose duration does not fit;
    // the unchecked ones panic there.
    let span = match &caps[2] {
        "m" => Duration::try_minutes(count),
        "h" => Duration::try_hours(count),
        "d" => Duration::try_days(count),
        "w" => Duration::try_weeks(count),
        _ => unreachable!("grammar only admits mhdw"),
    };
    span.ok_or_else(|| CoreError::InvalidTimeframe(token.to_string()))
}

/// Resolve a timeframe token into a window ending now.
pub fn resolve_timeframe(token: &str) -> CoreResult<TimeWindow> {
    Ok(TimeWindow::ending_now(parse_timeframe(token)?))
}

/// Parse an explicit date or datetime string.
///
/// Accepts `YYYY-MM-DD` (midnight) and `YYYY-MM-DDTHH:MM:SS`, interpreted
/// as UTC.
pub fn parse_datetime(input: &str) -> CoreResult<DateTime<Utc>> {
    if input.is_empty() {
        return Err(CoreError::InvalidDate(input.to_string()));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&dt));
    }
    if let Ok(d) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let dt = d.and_hms_opt(0, 0, 0).expect("midnight is valid");
        return Ok(Utc.from_utc_datetime(&dt));
    }

    Err(CoreError::InvalidDate(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_units() {
        assert_eq!(parse_timeframe("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_timeframe("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_timeframe("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_timeframe("2w").unwrap(), Duration::weeks(2));
    }

    #[test]
    fn trims_and_lowercases() {
        assert_eq!(parse_timeframe(" 24H ").unwrap(), Duration::hours(24));
    }

    #[test]
    fn rejects_bad_tokens() {
        for bad in ["", "24", "h", "24x", "1.5h", "-3d", "24 h", "0m", "0w"] {
            assert!(
                matches!(parse_timeframe(bad), Err(CoreError::InvalidTimeframe(_))),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn oversized_counts_are_rejected_not_panics() {
        // Grammar-valid tokens whose duration cannot be represented.
        for bad in ["9223372036854775807w", "106751991167301d", "9999999999999999999h"] {
            assert!(
                matches!(parse_timeframe(bad), Err(CoreError::InvalidTimeframe(_))),
                "expected rejection for {:?}",
                bad
            );
        }

        // Representable as a duration but wider than the datetime range:
        // the window clamps instead of overflowing.
        let window = resolve_timeframe("200000000w").unwrap();
        assert!(window.start() <= window.end());
        assert_eq!(window.start(), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn window_ends_at_wall_clock() {
        let window = resolve_timeframe("24h").unwrap();
        assert_eq!(window.end() - window.start(), Duration::hours(24));
        assert!((Utc::now() - window.end()).num_seconds().abs() <= 1);
    }

    #[test]
    fn window_normalizes_reversed_bounds() {
        let now = Utc::now();
        let w = TimeWindow::new(now, now - Duration::hours(1));
        assert!(w.start() <= w.end());
    }

    #[test]
    fn symmetric_window_is_centered() {
        let center = Utc::now();
        let w = TimeWindow::around(center, Duration::minutes(10));
        assert_eq!(center - w.start(), Duration::minutes(10));
        assert_eq!(w.end() - center, Duration::minutes(10));
    }

    #[test]
    fn parses_dates_and_datetimes() {
        let d = parse_datetime("2026-01-18").unwrap();
        assert_eq!(d.format("%H:%M:%S").to_string(), "00:00:00");

        let dt = parse_datetime("2026-01-18T14:30:00").unwrap();
        assert_eq!(dt.format("%Y-%m-%dT%H:%M:%S").to_string(), "2026-01-18T14:30:00");

        assert!(matches!(parse_datetime("18.01.2026"), Err(CoreError::InvalidDate(_))));
        assert!(matches!(parse_datetime(""), Err(CoreError::InvalidDate(_))));
    }
}
