//! Time and duration helpers

use chrono::{DateTime, Duration, Timelike, Utc};

/// Format a duration as `H:MM:SS`
///
/// Negative durations are formatted as zero.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Seconds between two instants as a float, never negative
pub fn span_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let millis = (to - from).num_milliseconds().max(0);
    millis as f64 / 1000.0
}

/// Hour of day (0-23) of a timestamp
pub fn hour_of_day(timestamp: DateTime<Utc>) -> u32 {
    timestamp.hour()
}
