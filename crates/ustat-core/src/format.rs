//! Human-readable formatting for presentation.

use chrono::DateTime;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const YEAR: u64 = 365 * DAY;

/// Formats seconds as `1y 2w 3d 4h 5m 6s`, omitting zero parts.
///
/// Zero formats as `0s`.
pub fn format_duration(seconds: u64) -> String {
    let units = [
        (YEAR, "y"),
        (WEEK, "w"),
        (DAY, "d"),
        (HOUR, "h"),
        (MINUTE, "m"),
        (1, "s"),
    ];

    let mut remaining = seconds;
    let mut parts = Vec::new();
    for (size, suffix) in units {
        let count = remaining / size;
        remaining %= size;
        if count > 0 {
            parts.push(format!("{count}{suffix}"));
        }
    }

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

/// Formats unix seconds as a UTC timestamp, or `None` for `0`/out of range.
pub fn format_unix_seconds(seconds: i64) -> Option<String> {
    if seconds == 0 {
        return None;
    }
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
