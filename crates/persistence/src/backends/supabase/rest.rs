//! PostgREST request encoding and error classification.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{BackendError, ConstraintError, StorageError};
use crate::types::{QueryOptions, Record};

pub(crate) const BACKEND: &str = "supabase";

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PostgrestError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

/// Renders a JSON value as a PostgREST filter operand.
pub(crate) fn operand(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builds the query string pairs for a read.
pub(crate) fn read_params(options: &QueryOptions) -> Vec<(String, String)> {
    let mut params = Vec::new();

    let select = match &options.select {
        Some(columns) if !columns.is_empty() => columns.join(","),
        _ => "*".to_string(),
    };
    params.push(("select".to_string(), select));
    params.extend(filter_params(&options.filters, options));

    let sort_keys = options.sort_keys();
    if !sort_keys.is_empty() {
        let order: Vec<String> = sort_keys
            .iter()
            .map(|o| format!("{}.{}", o.column, o.direction.as_sql().to_ascii_lowercase()))
            .collect();
        params.push(("order".to_string(), order.join(",")));
    }
    if let Some(limit) = options.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = options.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }
    params
}

/// Encodes equality filters and comparison conditions.
pub(crate) fn filter_params(filters: &Record, options: &QueryOptions) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = filters
        .iter()
        .map(|(column, value)| {
            let filter = if value.is_null() {
                "is.null".to_string()
            } else {
                format!("eq.{}", operand(value))
            };
            (column.clone(), filter)
        })
        .collect();

    params.extend(options.conditions.iter().map(|c| {
        (
            c.column.clone(),
            format!("{}.{}", c.op.as_postgrest(), operand(&c.value)),
        )
    }));
    params
}

/// Encodes an `in` filter over ids.
pub(crate) fn id_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

/// Reads the total from a `Content-Range: 0-9/42` header.
pub(crate) fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get("content-range")?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Maps a non-success response onto the storage taxonomy.
pub(crate) fn classify(table: &str, status: StatusCode, body: PostgrestError) -> StorageError {
    let message = body
        .message
        .clone()
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    match body.code.as_deref() {
        Some("23505") => {
            return StorageError::Constraint(ConstraintError::UniqueViolation {
                table: table.to_string(),
                column: body.details.as_deref().and_then(key_column),
                message,
            });
        }
        Some("23502") => {
            return StorageError::Constraint(ConstraintError::MissingRequiredField {
                table: table.to_string(),
                column: quoted_column(&message),
                message,
            });
        }
        _ => {}
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return StorageError::Backend(BackendError::ConnectionFailed {
            backend_name: BACKEND.to_string(),
            message: format!("credentials rejected: {}", message),
        });
    }

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        return StorageError::Backend(BackendError::Unavailable {
            backend_name: BACKEND.to_string(),
            message: format!("{} ({})", message, status.as_u16()),
        });
    }

    let mut detail = match body.code {
        Some(code) => format!("{} ({})", message, code),
        None => message,
    };
    if let Some(hint) = body.hint {
        detail.push_str("; hint: ");
        detail.push_str(&hint);
    }
    StorageError::Backend(BackendError::QueryError {
        backend_name: BACKEND.to_string(),
        message: detail,
    })
}

/// Maps a transport failure onto the storage taxonomy.
pub(crate) fn transport(operation: &str, err: reqwest::Error, timeout_ms: u64) -> StorageError {
    if err.is_timeout() {
        return StorageError::Backend(BackendError::Timeout {
            backend_name: BACKEND.to_string(),
            operation: operation.to_string(),
            timeout_ms,
        });
    }
    if err.is_connect() {
        return StorageError::Backend(BackendError::ConnectionFailed {
            backend_name: BACKEND.to_string(),
            message: err.to_string(),
        });
    }
    if err.is_decode() {
        return StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        });
    }
    StorageError::Backend(BackendError::Internal {
        backend_name: BACKEND.to_string(),
        message: err.to_string(),
        source: Some(Box::new(err)),
    })
}

/// Extracts `slug` from details like `Key (slug)=(acme) already exists.`
fn key_column(detail: &str) -> Option<String> {
    let start = detail.find("Key (")? + "Key (".len();
    let end = detail[start..].find(')')? + start;
    Some(detail[start..end].to_string())
}

/// Extracts `name` from `null value in column "name" of relation ...`.
fn quoted_column(message: &str) -> Option<String> {
    let start = message.find("column \"")? + "column \"".len();
    let end = message[start..].find('"')? + start;
    Some(message[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{Comparison, OrderBy};
    use serde_json::json;

    #[test]
    fn test_read_params() {
        let options = QueryOptions::new()
            .where_eq("status", json!("scheduled"))
            .where_eq("location", Value::Null)
            .condition("drone_count", Comparison::Gte, json!(100))
            .order_by(OrderBy::desc("scheduled_at"))
            .order_by(OrderBy::asc("name"))
            .select(["id", "name"])
            .limit(5)
            .offset(10);

        let params = read_params(&options);
        let lookup = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(lookup("select"), Some("id,name"));
        assert_eq!(lookup("status"), Some("eq.scheduled"));
        assert_eq!(lookup("location"), Some("is.null"));
        assert_eq!(lookup("drone_count"), Some("gte.100"));
        assert_eq!(lookup("order"), Some("scheduled_at.desc,name.asc,id.asc"));
        assert_eq!(lookup("limit"), Some("5"));
        assert_eq!(lookup("offset"), Some("10"));
    }

    #[test]
    fn test_id_list() {
        assert_eq!(
            id_list(&["a".to_string(), "b".to_string()]),
            "in.(\"a\",\"b\")"
        );
    }

    #[test]
    fn test_content_range_total() {
        let mut headers = HeaderMap::new();
        headers.insert("content-range", "0-9/42".parse().unwrap());
        assert_eq!(content_range_total(&headers), Some(42));

        headers.insert("content-range", "*/0".parse().unwrap());
        assert_eq!(content_range_total(&headers), Some(0));
    }

    #[test]
    fn test_classify_unique_violation() {
        let body = PostgrestError {
            code: Some("23505".to_string()),
            message: Some("duplicate key value violates unique constraint".to_string()),
            details: Some("Key (slug)=(acme) already exists.".to_string()),
            hint: None,
        };
        let err = classify("organizations", StatusCode::CONFLICT, body);
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        match err {
            StorageError::Constraint(ConstraintError::UniqueViolation { column, .. }) => {
                assert_eq!(column.as_deref(), Some("slug"));
            }
            other => panic!("expected a unique violation, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_not_null() {
        let body = PostgrestError {
            code: Some("23502".to_string()),
            message: Some(
                "null value in column \"name\" of relation \"shows\" violates not-null constraint"
                    .to_string(),
            ),
            ..Default::default()
        };
        let err = classify("shows", StatusCode::BAD_REQUEST, body);
        match err {
            StorageError::Constraint(ConstraintError::MissingRequiredField { column, .. }) => {
                assert_eq!(column.as_deref(), Some("name"));
            }
            other => panic!("expected a missing field, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_status_classes() {
        let err = classify("shows", StatusCode::SERVICE_UNAVAILABLE, PostgrestError::default());
        assert_eq!(err.kind(), ErrorKind::Connection);

        let err = classify("shows", StatusCode::UNAUTHORIZED, PostgrestError::default());
        assert_eq!(err.kind(), ErrorKind::Connection);

        let body = PostgrestError {
            code: Some("42703".to_string()),
            message: Some("column shows.nope does not exist".to_string()),
            ..Default::default()
        };
        let err = classify("shows", StatusCode::BAD_REQUEST, body);
        assert_eq!(err.kind(), ErrorKind::Backend);
    }
}
