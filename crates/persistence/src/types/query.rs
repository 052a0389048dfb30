//! Query options understood by every provider.
//!
//! Query capability is intentionally flat: equality criteria, explicit
//! comparison conditions, projection, ordering and offset pagination. There
//! is no OR composition and no joins.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, StorageResult};

use super::record::Record;

/// Sort direction for an ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending (default).
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    /// SQL keyword for this direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One ordering key. Keys are applied in the order given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Column to sort by.
    pub column: String,
    /// Direction for this column.
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    /// Ascending order on `column`.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending order on `column`.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Comparison operator for a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl Comparison {
    /// SQL operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }

    /// PostgREST filter operator.
    pub fn as_postgrest(&self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Ne => "neq",
            Comparison::Gt => "gt",
            Comparison::Gte => "gte",
            Comparison::Lt => "lt",
            Comparison::Lte => "lte",
        }
    }
}

/// A single comparison predicate on one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Column to compare.
    pub column: String,
    /// Operator.
    pub op: Comparison,
    /// Right-hand value (must not be null).
    pub value: Value,
}

/// Options accepted by `find_all`, `find_by` and `count`.
///
/// # Example
///
/// ```
/// use flock_persistence::types::{Comparison, OrderBy, QueryOptions};
/// use serde_json::json;
///
/// let options = QueryOptions::new()
///     .where_eq("status", json!("scheduled"))
///     .condition("scheduled_at", Comparison::Gt, json!("2026-01-01T00:00:00.000000Z"))
///     .order_by(OrderBy::asc("scheduled_at"))
///     .limit(10);
///
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Maximum number of rows to return.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Number of rows to skip.
    #[serde(default)]
    pub offset: Option<u64>,
    /// Ordering keys, applied in order.
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Columns to return; `None` returns every column.
    #[serde(default)]
    pub select: Option<Vec<String>>,
    /// Equality criteria. A null value matches SQL `NULL`.
    #[serde(default, rename = "where")]
    pub filters: Record,
    /// Comparison conditions, all of which must hold.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl QueryOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the row limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Appends an ordering key.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Restricts the returned columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Adds an equality criterion.
    pub fn where_eq(mut self, column: impl Into<String>, value: Value) -> Self {
        self.filters.insert(column.into(), value);
        self
    }

    /// Adds a comparison condition.
    pub fn condition(mut self, column: impl Into<String>, op: Comparison, value: Value) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            op,
            value,
        });
        self
    }

    /// Ordering keys as executed.
    ///
    /// When any key is given, `id ASC` is appended as a final tiebreaker so
    /// rows equal on every key still come back in a stable order across
    /// pages. Empty when no ordering was requested.
    pub fn sort_keys(&self) -> Vec<OrderBy> {
        let mut keys = self.order_by.clone();
        if !keys.is_empty() && !keys.iter().any(|k| k.column == "id") {
            keys.push(OrderBy::asc("id"));
        }
        keys
    }

    /// Merges extra equality criteria into these options.
    pub fn with_criteria(mut self, criteria: Record) -> Self {
        self.filters.extend(criteria);
        self
    }

    /// Checks that every referenced column is a plain identifier and that
    /// conditions compare against concrete values.
    pub fn validate(&self) -> StorageResult<()> {
        for column in self.filters.keys() {
            check_identifier(column)?;
        }
        for condition in &self.conditions {
            check_identifier(&condition.column)?;
            if condition.value.is_null() {
                return Err(QueryError::InvalidValue {
                    field: condition.column.clone(),
                    message: "comparison against null; use an equality criterion instead"
                        .to_string(),
                }
                .into());
            }
        }
        for order in &self.order_by {
            check_identifier(&order.column)?;
        }
        if let Some(select) = &self.select {
            for column in select {
                check_identifier(column)?;
            }
        }
        Ok(())
    }
}

/// Validates a table or column name.
///
/// Names are interpolated into SQL and URLs, so only `[A-Za-z_][A-Za-z0-9_]*`
/// is accepted.
pub fn check_identifier(name: &str) -> StorageResult<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid && name.len() <= 63 {
        Ok(name)
    } else {
        Err(QueryError::InvalidIdentifier {
            identifier: name.to_string(),
        }
        .into())
    }
}
