//! Timestamp helpers.
//!
//! Everything persisted goes through [`format_ts`] so stored strings sort
//! chronologically (UTC, millisecond precision, `Z` suffix).

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Garbage yields `None` rather than an error;
/// callers decide what a missing clock means.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .ok()
}
