//! Timestamp format persisted in metadata (`lastmodified`, `created_at`)
//!
//! Always UTC at second precision so a parse/format cycle is lossless.

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};

use crate::error::{TreesealError, TreesealResult};

pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current time, truncated to whole seconds.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(DATE_FORMAT).to_string()
}

pub fn parse(value: &str) -> TreesealResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, DATE_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| TreesealError::MalformedTimestamp {
            value: value.to_owned(),
            reason: e.to_string(),
        })
}
