// crates/types/src/timestamp.rs
//! Lenient ISO-8601 timestamp parsing.
//!
//! The backend serializes some datetimes with an offset and some naive
//! (database rows written without tz). Naive values are taken as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Parse an RFC 3339 timestamp, falling back to a naive `YYYY-MM-DDTHH:MM:SS[.f]`.
pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// `deserialize_with` helper for `Option<DateTime<Utc>>` fields.
///
/// Missing, null and unparseable values all become `None`; a bad timestamp
/// never makes the surrounding message malformed.
pub fn lenient<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(d)?;
    Ok(raw.as_ref().and_then(serde_json::Value::as_str).and_then(parse))
}
