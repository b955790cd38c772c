//! Shared timestamp and identifier helpers.

use chrono::{DateTime, Duration, Utc};
use ulid::Ulid;

/// Current UTC time as an RFC 3339 string (second precision).
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// RFC 3339 timestamp `days` days in the past.
pub fn days_ago_iso(days: i64) -> String {
    (Utc::now() - Duration::days(days)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 timestamp, tolerating missing offsets.
pub fn parse_iso(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// True when `ts` is older than `days` days.
pub fn older_than_days(ts: &str, days: i64) -> bool {
    match parse_iso(ts) {
        Some(dt) => dt < Utc::now() - Duration::days(days),
        None => false,
    }
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Short lowercase ULID suffix for collision-proof slugs.
pub fn short_id() -> String {
    Ulid::new().to_string()[18..].to_lowercase()
}
