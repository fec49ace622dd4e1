//! Repository layer: entity-scoped database operations.
//!
//! Free functions over `&Connection`, one sub-module per table. UUIDs
//! are stored as text; timestamps as UTC strings in a fixed format that
//! compares lexicographically, so SQL `<=` on them is time order.

mod delivery;
mod medication;
mod reminder;

pub use delivery::*;
pub use medication::*;
pub use reminder::*;

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use super::DatabaseError;

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
pub(crate) const TIME_FORMAT: &str = "%H:%M";

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad timestamp '{s}': {e}")))
}

pub(crate) fn fmt_time(t: NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

pub(crate) fn parse_time(s: &str) -> Result<NaiveTime, DatabaseError> {
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad time of day '{s}': {e}")))
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(format!("bad uuid '{s}': {e}")))
}
