//! Timestamp helpers
//!
//! Every timestamp that crosses a process boundary (source rows, configuration,
//! checkpoint files, serialized records) is RFC 3339 text. Local timestamps from the
//! monitored server carry no offset and are rendered without one.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{JobtrailError, Result};

/// Format used for offset-less local timestamps
pub const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse an RFC 3339 timestamp and normalize it to UTC
pub fn parse_utc(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| JobtrailError::invalid_timestamp(text, e.to_string()))
}

/// Render a UTC timestamp as RFC 3339 with a `Z` suffix
pub fn format_utc(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Render a local timestamp without an offset
pub fn format_local(ts: &NaiveDateTime) -> String {
    ts.format(LOCAL_FORMAT).to_string()
}

/// Far-future bound used when no stop boundary is configured
pub fn far_future() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC
}
