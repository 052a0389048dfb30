//! Synchronous statement execution shared by the provider and transactions.
//!
//! Every function takes a borrowed [`Connection`], so the same code runs on a
//! freshly pooled connection or on the connection pinned by a transaction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, Row, params_from_iter};
use serde_json::{Map, Number, Value};

use crate::error::{BackendError, ConstraintError, StorageError, StorageResult};
use crate::types::{QueryOptions, Record, check_identifier};

const BACKEND: &str = "sqlite";

// Extended result codes.
const SQLITE_CONSTRAINT_NOTNULL: i32 = 1299;
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// How a declared column type is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Boolean,
    Json,
    Plain,
}

impl ColumnKind {
    fn from_declared(declared: &str) -> Self {
        let declared = declared.to_ascii_uppercase();
        if declared.contains("BOOL") {
            ColumnKind::Boolean
        } else if declared == "JSON" || declared == "JSONB" {
            ColumnKind::Json
        } else {
            ColumnKind::Plain
        }
    }
}

type TableColumns = Arc<HashMap<String, ColumnKind>>;

/// Declared column types per table, read from `PRAGMA table_info`.
#[derive(Debug, Default)]
pub(crate) struct ColumnCache {
    tables: RwLock<HashMap<String, TableColumns>>,
}

impl ColumnCache {
    fn columns(&self, conn: &Connection, table: &str) -> StorageResult<TableColumns> {
        if let Some(columns) = self.tables.read().get(table) {
            return Ok(columns.clone());
        }

        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", table))
            .map_err(|e| classify(table, e))?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let declared: String = row.get(2)?;
                Ok((name, ColumnKind::from_declared(&declared)))
            })
            .map_err(|e| classify(table, e))?;

        let mut columns = HashMap::new();
        for row in rows {
            let (name, kind) = row.map_err(|e| classify(table, e))?;
            columns.insert(name, kind);
        }
        let columns = Arc::new(columns);

        // Unknown tables are not cached; they may be created later.
        if !columns.is_empty() {
            self.tables.write().insert(table.to_string(), columns.clone());
        }
        Ok(columns)
    }

    /// Forgets one table, or every table when `None`.
    pub(crate) fn invalidate(&self, table: Option<&str>) {
        let mut tables = self.tables.write();
        match table {
            Some(table) => {
                tables.remove(table);
            }
            None => tables.clear(),
        }
    }
}

/// Maps a driver error onto the storage taxonomy.
pub(crate) fn classify(table: &str, err: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(ffi_err, message) = &err {
        let message = message.clone().unwrap_or_else(|| err.to_string());
        match ffi_err.extended_code {
            SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY => {
                return StorageError::Constraint(ConstraintError::UniqueViolation {
                    table: table.to_string(),
                    column: constrained_column(&message),
                    message,
                });
            }
            SQLITE_CONSTRAINT_NOTNULL => {
                return StorageError::Constraint(ConstraintError::MissingRequiredField {
                    table: table.to_string(),
                    column: constrained_column(&message),
                    message,
                });
            }
            _ => {}
        }
        if matches!(ffi_err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
            return StorageError::Backend(BackendError::Unavailable {
                backend_name: BACKEND.to_string(),
                message,
            });
        }
        return StorageError::Backend(BackendError::QueryError {
            backend_name: BACKEND.to_string(),
            message,
        });
    }

    StorageError::Backend(BackendError::Internal {
        backend_name: BACKEND.to_string(),
        message: err.to_string(),
        source: Some(Box::new(err)),
    })
}

/// Extracts `email` from messages like `UNIQUE constraint failed: users.email`.
fn constrained_column(message: &str) -> Option<String> {
    let (_, rest) = message.rsplit_once(": ")?;
    let first = rest.split(',').next()?.trim();
    let (_, column) = first.split_once('.')?;
    Some(column.to_string())
}

/// Encodes a JSON value as a SQLite value.
pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>, kind: ColumnKind) -> Value {
    match (value, kind) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(i), ColumnKind::Boolean) => Value::Bool(i != 0),
        (ValueRef::Integer(i), _) => Value::from(i),
        (ValueRef::Real(f), _) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        (ValueRef::Text(text), ColumnKind::Json) => serde_json::from_slice(text)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(text).into_owned())),
        (ValueRef::Text(text), _) => Value::String(String::from_utf8_lossy(text).into_owned()),
        (ValueRef::Blob(bytes), _) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

fn decode_row(row: &Row<'_>, names: &[String], columns: &TableColumns) -> rusqlite::Result<Record> {
    let mut record = Map::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        let kind = columns.get(name).copied().unwrap_or(ColumnKind::Plain);
        record.insert(name.clone(), from_sql(row.get_ref(index)?, kind));
    }
    Ok(record)
}

fn select_rows(
    conn: &Connection,
    cache: &ColumnCache,
    table: &str,
    sql: &str,
    params: Vec<SqlValue>,
) -> StorageResult<Vec<Record>> {
    let columns = cache.columns(conn, table)?;
    let mut stmt = conn.prepare(sql).map_err(|e| classify(table, e))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map(params_from_iter(params), |row| decode_row(row, &names, &columns))
        .map_err(|e| classify(table, e))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| classify(table, e))
}

/// Builds the `WHERE` clause for equality criteria and conditions.
fn where_clause(options: &QueryOptions, params: &mut Vec<SqlValue>) -> String {
    let mut predicates = Vec::new();

    for (column, value) in &options.filters {
        if value.is_null() {
            predicates.push(format!("\"{}\" IS NULL", column));
        } else {
            predicates.push(format!("\"{}\" = ?", column));
            params.push(to_sql(value));
        }
    }

    for condition in &options.conditions {
        predicates.push(format!("\"{}\" {} ?", condition.column, condition.op.as_sql()));
        params.push(to_sql(&condition.value));
    }

    if predicates.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicates.join(" AND "))
    }
}

fn column_list(select: Option<&Vec<String>>) -> String {
    match select {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "*".to_string(),
    }
}

pub(crate) fn find_by_id(
    conn: &Connection,
    cache: &ColumnCache,
    table: &str,
    id: &str,
) -> StorageResult<Option<Record>> {
    check_identifier(table)?;
    let sql = format!("SELECT * FROM \"{}\" WHERE \"id\" = ? LIMIT 1", table);
    let rows = select_rows(conn, cache, table, &sql, vec![SqlValue::Text(id.to_string())])?;
    Ok(rows.into_iter().next())
}

pub(crate) fn find_all(
    conn: &Connection,
    cache: &ColumnCache,
    table: &str,
    options: &QueryOptions,
) -> StorageResult<Vec<Record>> {
    check_identifier(table)?;
    options.validate()?;

    let mut params = Vec::new();
    let mut sql = format!(
        "SELECT {} FROM \"{}\"{}",
        column_list(options.select.as_ref()),
        table,
        where_clause(options, &mut params)
    );

    let sort_keys = options.sort_keys();
    if !sort_keys.is_empty() {
        let keys: Vec<String> = sort_keys
            .iter()
            .map(|o| format!("\"{}\" {}", o.column, o.direction.as_sql()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }

    match (options.limit, options.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
        (None, None) => {}
    }

    select_rows(conn, cache, table, &sql, params)
}

pub(crate) fn count(
    conn: &Connection,
    table: &str,
    criteria: Option<&Record>,
) -> StorageResult<u64> {
    check_identifier(table)?;
    let options = QueryOptions::new().with_criteria(criteria.cloned().unwrap_or_default());
    options.validate()?;

    let mut params = Vec::new();
    let sql = format!(
        "SELECT COUNT(*) FROM \"{}\"{}",
        table,
        where_clause(&options, &mut params)
    );
    let count: i64 = conn
        .query_row(&sql, params_from_iter(params), |row| row.get(0))
        .map_err(|e| classify(table, e))?;
    Ok(count.max(0) as u64)
}

/// Inserts an already stamped record.
pub(crate) fn insert(
    conn: &Connection,
    cache: &ColumnCache,
    table: &str,
    data: &Record,
) -> StorageResult<Record> {
    check_identifier(table)?;
    let mut columns = Vec::with_capacity(data.len());
    let mut params = Vec::with_capacity(data.len());
    for (column, value) in data {
        check_identifier(column)?;
        columns.push(format!("\"{}\"", column));
        params.push(to_sql(value));
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING *",
        table,
        columns.join(", "),
        placeholders
    );

    let rows = select_rows(conn, cache, table, &sql, params)?;
    rows.into_iter().next().ok_or_else(|| {
        StorageError::Backend(BackendError::Internal {
            backend_name: BACKEND.to_string(),
            message: format!("insert into {} returned no row", table),
            source: None,
        })
    })
}

/// Applies an already stamped partial record.
pub(crate) fn update(
    conn: &Connection,
    cache: &ColumnCache,
    table: &str,
    id: &str,
    partial: &Record,
) -> StorageResult<Record> {
    check_identifier(table)?;
    let mut assignments = Vec::with_capacity(partial.len());
    let mut params = Vec::with_capacity(partial.len() + 1);
    for (column, value) in partial {
        check_identifier(column)?;
        assignments.push(format!("\"{}\" = ?", column));
        params.push(to_sql(value));
    }
    params.push(SqlValue::Text(id.to_string()));

    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE \"id\" = ? RETURNING *",
        table,
        assignments.join(", ")
    );

    let rows = select_rows(conn, cache, table, &sql, params)?;
    rows.into_iter()
        .next()
        .ok_or_else(|| StorageError::not_found(table, id))
}

pub(crate) fn delete(conn: &Connection, table: &str, id: &str) -> StorageResult<bool> {
    check_identifier(table)?;
    let sql = format!("DELETE FROM \"{}\" WHERE \"id\" = ?", table);
    let changed = conn.execute(&sql, [id]).map_err(|e| classify(table, e))?;
    Ok(changed > 0)
}

/// Runs raw SQL that returns rows. Values are decoded by storage class only.
pub(crate) fn query(conn: &Connection, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
    let mut stmt = conn.prepare(sql).map_err(|e| classify("<raw>", e))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let columns: TableColumns = Arc::default();
    let rows = stmt
        .query_map(params_from_iter(params.iter().map(to_sql)), |row| {
            decode_row(row, &names, &columns)
        })
        .map_err(|e| classify("<raw>", e))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| classify("<raw>", e))
}

/// Runs a raw SQL statement and returns the number of changed rows.
pub(crate) fn execute(
    conn: &Connection,
    cache: &ColumnCache,
    sql: &str,
    params: &[Value],
) -> StorageResult<u64> {
    let changed = conn
        .execute(sql, params_from_iter(params.iter().map(to_sql)))
        .map_err(|e| classify("<raw>", e))?;
    // Raw statements may alter tables.
    cache.invalidate(None);
    Ok(changed as u64)
}
