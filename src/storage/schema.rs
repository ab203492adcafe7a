//! Database schema and column conversions
//!
//! ## Design Philosophy
//!
//! We use a **hybrid approach** to balance queryability with flexibility:
//!
//! ### Typed Columns
//! Everything that is filtered or ordered on is a typed column:
//! - `instance_id`, `category`, `collected_at` for the score series
//! - `collector`, `status`, `started_at` for the execution log
//!
//! ### Payloads (JSON)
//! Category detail payloads, group sub-scores and composite details are
//! stored as JSON text. They are only ever read back whole.
//!
//! Timestamps are stored as Unix milliseconds. Enums are stored as their
//! snake_case names.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::{StorageError, StorageResult};

/// Stored value of the implicit rule group
pub const IMPLICIT_GROUP: &str = "";

/// Convert a timestamp to Unix milliseconds for SQLite
pub fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert Unix milliseconds from SQLite to a timestamp
pub fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

pub fn to_json<T: Serialize>(value: &T, column: &str) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| {
        StorageError::SerializationError(format!("failed to serialize {column}: {e}"))
    })
}

pub fn from_json<T: DeserializeOwned>(text: &str, column: &str) -> StorageResult<T> {
    serde_json::from_str(text).map_err(|e| {
        StorageError::SerializationError(format!("failed to deserialize {column}: {e}"))
    })
}

/// Parse an enum column stored as text
pub fn parse_column<T>(text: &str, column: &str) -> StorageResult<T>
where
    T: FromStr<Err = String>,
{
    text.parse().map_err(|reason| StorageError::InvalidColumn {
        column: column.to_string(),
        reason,
    })
}

pub fn group_to_column(group: Option<&str>) -> &str {
    group.unwrap_or(IMPLICIT_GROUP)
}

pub fn group_from_column(group: String) -> Option<String> {
    (group != IMPLICIT_GROUP).then_some(group)
}
