//! Time handling for the chat service.
//!
//! Message timestamps arrive as seconds or milliseconds, as numbers or strings, so
//! everything is normalized to epoch milliseconds before it is compared. CLI date flags
//! accept human-friendly expressions like "2w ago" or "yesterday".

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Numeric timestamps above this are already milliseconds.
pub const MILLIS_THRESHOLD: f64 = 1e12;

/// Matches: "2h ago", "30m ago", "1d ago", "2w ago", "1mo ago", "1y ago"
static RELATIVE_AGO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*(y|mo|w|d|h|m)\s*ago$").expect("valid ago regex"));

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub fn epoch_number_to_millis(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value > MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    Some(millis.round() as i64)
}

/// A string is tried as a plain number first and only then as a calendar date.
pub fn normalize_timestamp_text(text: &str) -> Option<i64> {
    let raw = text.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(value) = raw.parse::<f64>() {
        return epoch_number_to_millis(value);
    }
    parse_date_string(raw).map(|dt| dt.timestamp_millis())
}

fn parse_date_string(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Wire format for `dateAfter`/`dateBefore`: RFC 3339, UTC, millisecond precision.
pub fn format_query_date(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a CLI date flag into an instant.
///
/// # Supported formats
/// - Relative past: "2h ago", "1d ago", "2w ago", "1mo ago", "1y ago"
/// - Named: "now", "today", "yesterday"
/// - Date: "2024-01-15" (YYYY-MM-DD, midnight UTC)
/// - RFC3339: "2024-01-15T10:00:00Z"
pub fn parse_time_expression(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err("empty time expression".to_string());
    }

    let lower = raw.to_lowercase();
    match lower.as_str() {
        "now" => return Ok(now),
        "today" => return Ok(start_of_day(now)),
        "yesterday" => return Ok(start_of_day(now - Duration::days(1))),
        _ => {}
    }

    if let Some(caps) = RELATIVE_AGO_RE.captures(&lower) {
        let value: i64 = caps[1]
            .parse()
            .map_err(|_| format!("invalid number in {raw:?}"))?;
        if value < 1 {
            return Err(format!("invalid relative time {raw:?}"));
        }
        let duration = match &caps[2] {
            // Months and years are approximated as 30 and 365 days.
            "y" => value.checked_mul(365).and_then(Duration::try_days),
            "mo" => value.checked_mul(30).and_then(Duration::try_days),
            "w" => Duration::try_weeks(value),
            "d" => Duration::try_days(value),
            "h" => Duration::try_hours(value),
            "m" => Duration::try_minutes(value),
            unit => return Err(format!("invalid time unit {unit:?}")),
        };
        return duration
            .and_then(|duration| now.checked_sub_signed(duration))
            .ok_or_else(|| format!("invalid relative time {raw:?} (out of range)"));
    }

    parse_date_string(raw).ok_or_else(|| format!("invalid time expression {raw:?}"))
}

fn start_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(dt)
}

/// "5m ago" style label relative to `now`, both in epoch milliseconds.
pub fn format_relative_millis(timestamp: i64, now: i64) -> String {
    if timestamp <= 0 || now <= 0 {
        return "-".to_string();
    }
    let delta = (now - timestamp).max(0) / 1000;
    if delta < 10 {
        return "now".to_string();
    }
    if delta < 60 {
        return format!("{delta}s ago");
    }
    let minutes = delta / 60;
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    let days = hours / 24;
    if days < 7 {
        return format!("{days}d ago");
    }
    if days < 30 {
        return format!("{}w ago", days / 7);
    }
    if days < 365 {
        return format!("{}mo ago", days / 30);
    }
    format!("{}y ago", days / 365)
}
