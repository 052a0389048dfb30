//! Statement building and execution for PostgreSQL.
//!
//! Records cross the wire as JSON. Writes and predicates go through
//! `json_populate_record(NULL::"table", $n)`, which converts each JSON value
//! to the declared column type on the server, so the adapter never needs to
//! know a table's column types. Rows come back as `to_jsonb(row)`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value, json};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Row};

use crate::error::{
    BackendError, ConstraintError, QueryError, StorageError, StorageResult,
};
use crate::types::{QueryOptions, Record, check_identifier, into_record};

const BACKEND: &str = "postgres";

/// Maps a driver error onto the storage taxonomy.
pub(crate) fn classify(table: &str, err: tokio_postgres::Error) -> StorageError {
    if let Some(db) = err.as_db_error() {
        let code = db.code();
        if *code == SqlState::UNIQUE_VIOLATION {
            return StorageError::Constraint(ConstraintError::UniqueViolation {
                table: table.to_string(),
                column: db.detail().and_then(key_column),
                message: db.message().to_string(),
            });
        }
        if *code == SqlState::NOT_NULL_VIOLATION {
            return StorageError::Constraint(ConstraintError::MissingRequiredField {
                table: table.to_string(),
                column: db.column().map(String::from),
                message: db.message().to_string(),
            });
        }
        if code.code().starts_with("08") || *code == SqlState::ADMIN_SHUTDOWN {
            return StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: BACKEND.to_string(),
                message: db.message().to_string(),
            });
        }
        return StorageError::Backend(BackendError::QueryError {
            backend_name: BACKEND.to_string(),
            message: format!("{} ({})", db.message(), code.code()),
        });
    }

    if err.is_closed() {
        return StorageError::Backend(BackendError::ConnectionFailed {
            backend_name: BACKEND.to_string(),
            message: err.to_string(),
        });
    }

    StorageError::Backend(BackendError::Internal {
        backend_name: BACKEND.to_string(),
        message: err.to_string(),
        source: Some(Box::new(err)),
    })
}

/// Extracts `email` from details like `Key (email)=(a@b.com) already exists.`
fn key_column(detail: &str) -> Option<String> {
    let start = detail.find("Key (")? + "Key (".len();
    let end = detail[start..].find(')')? + start;
    Some(detail[start..end].to_string())
}

/// Accumulates SQL text and JSON parameters.
struct Statement<'a> {
    table: &'a str,
    params: Vec<Value>,
}

impl<'a> Statement<'a> {
    fn new(table: &'a str) -> Self {
        Self {
            table,
            params: Vec::new(),
        }
    }

    /// Binds `value` as `column` and returns an expression of the column's type.
    fn typed(&mut self, column: &str, value: &Value) -> String {
        let mut object = Map::new();
        object.insert(column.to_string(), value.clone());
        self.params.push(Value::Object(object));
        format!(
            "(json_populate_record(NULL::\"{}\", ${})).\"{}\"",
            self.table,
            self.params.len(),
            column
        )
    }

    fn where_clause(&mut self, options: &QueryOptions) -> String {
        let mut predicates = Vec::new();

        for (column, value) in &options.filters {
            if value.is_null() {
                predicates.push(format!("r.\"{}\" IS NULL", column));
            } else {
                let rhs = self.typed(column, value);
                predicates.push(format!("r.\"{}\" = {}", column, rhs));
            }
        }

        for condition in &options.conditions {
            let rhs = self.typed(&condition.column, &condition.value);
            predicates.push(format!(
                "r.\"{}\" {} {}",
                condition.column,
                condition.op.as_sql(),
                rhs
            ));
        }

        if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        }
    }

    fn refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
    }
}

fn decode_rows(table: &str, rows: Vec<Row>) -> StorageResult<Vec<Record>> {
    rows.into_iter()
        .map(|row| {
            let value: Value = row.try_get(0).map_err(|e| classify(table, e))?;
            into_record(table, value)
        })
        .collect()
}

fn projection(select: Option<&Vec<String>>) -> String {
    match select {
        Some(columns) if !columns.is_empty() => {
            let pairs: Vec<String> = columns
                .iter()
                .map(|c| format!("'{}', r.\"{}\"", c, c))
                .collect();
            format!("jsonb_build_object({})", pairs.join(", "))
        }
        _ => "to_jsonb(r)".to_string(),
    }
}

pub(crate) async fn find_all(
    client: &Client,
    table: &str,
    options: &QueryOptions,
) -> StorageResult<Vec<Record>> {
    check_identifier(table)?;
    options.validate()?;

    let mut stmt = Statement::new(table);
    let mut sql = format!(
        "SELECT {} FROM \"{}\" AS r{}",
        projection(options.select.as_ref()),
        table,
        stmt.where_clause(options)
    );

    let sort_keys = options.sort_keys();
    if !sort_keys.is_empty() {
        let keys: Vec<String> = sort_keys
            .iter()
            .map(|o| format!("r.\"{}\" {}", o.column, o.direction.as_sql()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }
    if let Some(limit) = options.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = options.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }

    let rows = client
        .query(&sql, &stmt.refs())
        .await
        .map_err(|e| classify(table, e))?;
    decode_rows(table, rows)
}

pub(crate) async fn find_by_id(
    client: &Client,
    table: &str,
    id: &str,
) -> StorageResult<Option<Record>> {
    let options = QueryOptions::new().where_eq("id", json!(id)).limit(1);
    Ok(find_all(client, table, &options).await?.into_iter().next())
}

pub(crate) async fn count(
    client: &Client,
    table: &str,
    criteria: Option<&Record>,
) -> StorageResult<u64> {
    check_identifier(table)?;
    let options = QueryOptions::new().with_criteria(criteria.cloned().unwrap_or_default());
    options.validate()?;

    let mut stmt = Statement::new(table);
    let sql = format!(
        "SELECT COUNT(*) FROM \"{}\" AS r{}",
        table,
        stmt.where_clause(&options)
    );
    let row = client
        .query_one(&sql, &stmt.refs())
        .await
        .map_err(|e| classify(table, e))?;
    let count: i64 = row.try_get(0).map_err(|e| classify(table, e))?;
    Ok(count.max(0) as u64)
}

/// Inserts an already stamped record.
pub(crate) async fn insert(client: &Client, table: &str, data: Record) -> StorageResult<Record> {
    check_identifier(table)?;
    let mut columns = Vec::with_capacity(data.len());
    for column in data.keys() {
        check_identifier(column)?;
        columns.push(format!("\"{}\"", column));
    }
    let selected: Vec<String> = columns.iter().map(|c| format!("p.{}", c)).collect();

    let sql = format!(
        "INSERT INTO \"{table}\" AS r ({}) SELECT {} FROM json_populate_record(NULL::\"{table}\", $1) AS p RETURNING to_jsonb(r)",
        columns.join(", "),
        selected.join(", "),
    );

    let payload = Value::Object(data);
    let row = client
        .query_one(&sql, &[&payload])
        .await
        .map_err(|e| classify(table, e))?;
    let value: Value = row.try_get(0).map_err(|e| classify(table, e))?;
    into_record(table, value)
}

/// Applies an already stamped partial record.
pub(crate) async fn update(
    client: &Client,
    table: &str,
    id: &str,
    partial: Record,
) -> StorageResult<Record> {
    check_identifier(table)?;
    let mut assignments = Vec::with_capacity(partial.len());
    for column in partial.keys() {
        check_identifier(column)?;
        assignments.push(format!("\"{}\" = p.\"{}\"", column, column));
    }

    let mut payload = partial;
    payload.insert("id".to_string(), Value::String(id.to_string()));

    let sql = format!(
        "UPDATE \"{table}\" AS r SET {} FROM json_populate_record(NULL::\"{table}\", $1) AS p WHERE r.\"id\" = p.\"id\" RETURNING to_jsonb(r)",
        assignments.join(", "),
    );

    let payload = Value::Object(payload);
    let row = client
        .query_opt(&sql, &[&payload])
        .await
        .map_err(|e| classify(table, e))?
        .ok_or_else(|| StorageError::not_found(table, id))?;
    let value: Value = row.try_get(0).map_err(|e| classify(table, e))?;
    into_record(table, value)
}

pub(crate) async fn delete(client: &Client, table: &str, id: &str) -> StorageResult<bool> {
    check_identifier(table)?;
    let mut stmt = Statement::new(table);
    let rhs = stmt.typed("id", &json!(id));
    let sql = format!("DELETE FROM \"{}\" AS r WHERE r.\"id\" = {}", table, rhs);
    let deleted = client
        .execute(&sql, &stmt.refs())
        .await
        .map_err(|e| classify(table, e))?;
    Ok(deleted > 0)
}

/// Runs raw SQL that returns rows.
///
/// The statement is wrapped as a CTE, so `SELECT` and data-modifying
/// statements with `RETURNING` both work.
pub(crate) async fn query(
    client: &Client,
    sql: &str,
    params: &[Value],
) -> StorageResult<Vec<Record>> {
    let wrapped = format!("WITH q AS ({}) SELECT to_jsonb(q) FROM q", sql);
    let prepared = client
        .prepare(&wrapped)
        .await
        .map_err(|e| classify("<raw>", e))?;
    let bound = bind_params(params, prepared.params())?;
    let refs: Vec<&(dyn ToSql + Sync)> = bound
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();
    let rows = client
        .query(&prepared, &refs)
        .await
        .map_err(|e| classify("<raw>", e))?;
    decode_rows("<raw>", rows)
}

/// Runs a raw SQL statement and returns the affected row count.
pub(crate) async fn execute(client: &Client, sql: &str, params: &[Value]) -> StorageResult<u64> {
    let prepared = client
        .prepare(sql)
        .await
        .map_err(|e| classify("<raw>", e))?;
    let bound = bind_params(params, prepared.params())?;
    let refs: Vec<&(dyn ToSql + Sync)> = bound
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();
    client
        .execute(&prepared, &refs)
        .await
        .map_err(|e| classify("<raw>", e))
}

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Converts JSON parameters to the types the server inferred for them.
fn bind_params(values: &[Value], types: &[Type]) -> StorageResult<Vec<BoxedParam>> {
    if values.len() != types.len() {
        return Err(StorageError::Query(QueryError::InvalidValue {
            field: "params".to_string(),
            message: format!("statement expects {} parameters, got {}", types.len(), values.len()),
        }));
    }

    values
        .iter()
        .zip(types)
        .enumerate()
        .map(|(index, (value, ty))| {
            bind_param(value, ty).map_err(|message| {
                StorageError::Query(QueryError::InvalidValue {
                    field: format!("${}", index + 1),
                    message,
                })
            })
        })
        .collect()
}

fn nullable<T>(
    value: &Value,
    expected: &str,
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<Option<T>, String> {
    if value.is_null() {
        return Ok(None);
    }
    convert(value)
        .map(Some)
        .ok_or_else(|| format!("expected {}, got {}", expected, value))
}

fn bind_param(value: &Value, ty: &Type) -> Result<BoxedParam, String> {
    let param: BoxedParam = match ty.name() {
        "bool" => Box::new(nullable(value, "a boolean", Value::as_bool)?),
        "int2" => Box::new(nullable(value, "a smallint", |v| {
            v.as_i64().and_then(|i| i16::try_from(i).ok())
        })?),
        "int4" => Box::new(nullable(value, "an integer", |v| {
            v.as_i64().and_then(|i| i32::try_from(i).ok())
        })?),
        "int8" => Box::new(nullable(value, "a bigint", Value::as_i64)?),
        "float4" => Box::new(nullable(value, "a number", |v| v.as_f64().map(|f| f as f32))?),
        "float8" => Box::new(nullable(value, "a number", Value::as_f64)?),
        "text" | "varchar" | "bpchar" | "name" | "unknown" => {
            Box::new(nullable(value, "text", |v| match v {
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })?)
        }
        "json" | "jsonb" => Box::new(if value.is_null() { None } else { Some(value.clone()) }),
        "timestamptz" => Box::new(nullable(value, "an RFC 3339 timestamp", |v| {
            v.as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        })?),
        "timestamp" => Box::new(nullable(value, "a timestamp", |v| {
            v.as_str().and_then(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.naive_utc())
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                    .ok()
            })
        })?),
        "date" => Box::new(nullable(value, "a date", |v| {
            v.as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        })?),
        "uuid" => Box::new(nullable(value, "a uuid", |v| {
            v.as_str().and_then(|s| uuid::Uuid::parse_str(s).ok())
        })?),
        other => {
            return Err(format!(
                "parameters of type {} are not supported; cast the placeholder, e.g. $1::float8",
                other
            ));
        }
    };
    Ok(param)
}
