//! Plain records exchanged with providers.
//!
//! Providers never see domain types. Every row travels as a [`Record`], a JSON
//! object keyed by column name. The helpers here apply the layer-assigned
//! metadata (`id`, `created_at`, `updated_at`) so that every backend stamps
//! rows the same way.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{QueryError, StorageResult};

/// A single row, keyed by column name.
pub type Record = Map<String, Value>;

/// Column holding the layer-assigned identifier.
pub const ID_COLUMN: &str = "id";

/// Column holding the creation timestamp.
pub const CREATED_AT_COLUMN: &str = "created_at";

/// Column holding the last-modification timestamp.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Returns the current time in the canonical storage format.
///
/// RFC 3339, UTC, microsecond precision. The fixed width keeps lexical and
/// chronological order identical, which SQLite relies on for range queries.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Generates a new row identifier.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Converts a JSON value into a record, rejecting anything but an object.
pub fn into_record(table: &str, value: Value) -> StorageResult<Record> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(QueryError::NotAnObject {
            table: table.to_string(),
        }
        .into()),
    }
}

/// Prepares a record for insertion.
///
/// Caller-supplied `id`, `created_at` and `updated_at` are discarded and
/// replaced with layer-assigned values.
pub fn stamp_new(mut data: Record) -> Record {
    let now = timestamp_now();
    data.insert(ID_COLUMN.to_string(), Value::String(generate_id()));
    data.insert(CREATED_AT_COLUMN.to_string(), Value::String(now.clone()));
    data.insert(UPDATED_AT_COLUMN.to_string(), Value::String(now));
    data
}

/// Prepares a partial record for an update.
///
/// `id` and `created_at` can never be overwritten; `updated_at` always advances.
pub fn stamp_update(mut partial: Record) -> Record {
    partial.remove(ID_COLUMN);
    partial.remove(CREATED_AT_COLUMN);
    partial.insert(UPDATED_AT_COLUMN.to_string(), Value::String(timestamp_now()));
    partial
}

/// Returns the identifier of a stored record.
pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID_COLUMN).and_then(Value::as_str)
}

/// Keeps only the selected columns.
pub fn project(record: Record, select: &[String]) -> Record {
    record
        .into_iter()
        .filter(|(key, _)| select.iter().any(|s| s == key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamp_new_replaces_caller_metadata() {
        let data = into_record(
            "users",
            json!({"id": "mine", "created_at": "1999-01-01", "email": "a@b.com"}),
        )
        .unwrap();

        let stamped = stamp_new(data);
        assert_ne!(record_id(&stamped), Some("mine"));
        assert_ne!(stamped["created_at"], json!("1999-01-01"));
        assert_eq!(stamped["created_at"], stamped["updated_at"]);
        assert_eq!(stamped["email"], json!("a@b.com"));
    }

    #[test]
    fn test_stamp_update_strips_immutable_columns() {
        let partial = into_record(
            "users",
            json!({"id": "other", "created_at": "x", "full_name": "Ada"}),
        )
        .unwrap();

        let stamped = stamp_update(partial);
        assert!(!stamped.contains_key("id"));
        assert!(!stamped.contains_key("created_at"));
        assert!(stamped.contains_key("updated_at"));
        assert_eq!(stamped["full_name"], json!("Ada"));
    }

    #[test]
    fn test_into_record_rejects_non_objects() {
        assert!(into_record("users", json!([1, 2])).is_err());
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-01-01T00:00:00.000000Z".len());
    }

    #[test]
    fn test_project() {
        let record = into_record(
            "users",
            json!({"id": "1", "email": "e", "password_hash": "h"}),
        )
        .unwrap();
        let projected = project(record, &["id".to_string(), "email".to_string()]);
        assert_eq!(projected.len(), 2);
        assert!(!projected.contains_key("password_hash"));
    }
}
