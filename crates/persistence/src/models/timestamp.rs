//! Serde helpers that write timestamps in the storage format.
//!
//! RFC 3339, UTC, microseconds, `Z` suffix. Any RFC 3339 offset is accepted
//! when reading, so PostgreSQL's `+00:00` rendering parses too.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Formats a timestamp the way the layer stores it.
pub fn format(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Writes `value` in the storage format.
pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(value))
}

/// Reads an RFC 3339 timestamp with any offset.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    DateTime::<Utc>::deserialize(deserializer)
}

/// Same format for optional timestamps.
pub mod option {
    use super::*;

    /// Writes `value` in the storage format, or null.
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&super::format(value)),
            None => serializer.serialize_none(),
        }
    }

    /// Reads an optional RFC 3339 timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<DateTime<Utc>>::deserialize(deserializer)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "super")]
        at: DateTime<Utc>,
        #[serde(default, with = "super::option")]
        maybe: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_writes_micros_with_z() {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 20, 0, 0).unwrap();
        let json = serde_json::to_value(Stamped { at, maybe: None }).unwrap();
        assert_eq!(json["at"], "2026-05-01T20:00:00.000000Z");
        assert!(json["maybe"].is_null());
    }

    #[test]
    fn test_reads_any_offset() {
        let parsed: Stamped = serde_json::from_str(
            r#"{"at": "2026-05-01T20:00:00.5+00:00", "maybe": "2026-05-01T22:00:00+02:00"}"#,
        )
        .unwrap();
        assert_eq!(parsed.maybe, Some(Utc.with_ymd_and_hms(2026, 5, 1, 20, 0, 0).unwrap()));
        assert_eq!(format(&parsed.at), "2026-05-01T20:00:00.500000Z");
    }
}
