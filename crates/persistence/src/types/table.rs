//! Table and column definitions used by schema operations.

use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

use super::query::check_identifier;

/// Logical column types, mapped onto each backend's native types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Free text.
    Text,
    /// 64-bit integer.
    Integer,
    /// Double precision float.
    Real,
    /// Boolean flag.
    Boolean,
    /// RFC 3339 timestamp.
    Timestamp,
    /// Arbitrary JSON document.
    Json,
}

impl ColumnType {
    /// Declared type for SQLite.
    ///
    /// Timestamps are stored as fixed-width text so lexical order matches
    /// chronological order. `BOOLEAN` and `JSON` are recognised again when
    /// rows are read back.
    pub fn sqlite_type(&self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Timestamp => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Json => "JSON",
        }
    }

    /// Declared type for PostgreSQL.
    pub fn postgres_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "BIGINT",
            ColumnType::Real => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMPTZ",
            ColumnType::Json => "JSONB",
        }
    }
}

/// A single column of a [`TableDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether values must be unique.
    pub unique: bool,
    /// Whether this is the primary key.
    pub primary_key: bool,
    /// Literal SQL default, rendered verbatim.
    pub default: Option<String>,
}

impl ColumnDefinition {
    /// Creates a nullable, non-unique column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            unique: false,
            primary_key: false,
            default: None,
        }
    }

    /// Marks the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column UNIQUE.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the column as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Sets a literal default expression.
    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Renders the column clause using the given type mapping.
    pub fn to_sql(&self, type_name: impl Fn(ColumnType) -> &'static str) -> String {
        let mut sql = format!("\"{}\" {}", self.name, type_name(self.column_type));
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else {
            if !self.nullable {
                sql.push_str(" NOT NULL");
            }
            if self.unique {
                sql.push_str(" UNIQUE");
            }
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// A table to be created by setup tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// Creates a table with the standard `id`, `created_at` and `updated_at`
    /// columns already declared.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: vec![
                ColumnDefinition::new("id", ColumnType::Text).primary_key(),
                ColumnDefinition::new("created_at", ColumnType::Timestamp).not_null(),
                ColumnDefinition::new("updated_at", ColumnType::Timestamp).not_null(),
            ],
        }
    }

    /// Appends a column.
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Looks up a column by name.
    pub fn find_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Validates the table and every column name.
    pub fn validate(&self) -> StorageResult<()> {
        check_identifier(&self.name)?;
        for column in &self.columns {
            check_identifier(&column.name)?;
        }
        Ok(())
    }

    /// Renders a `CREATE TABLE IF NOT EXISTS` statement.
    pub fn create_sql(&self, type_name: impl Fn(ColumnType) -> &'static str) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| c.to_sql(&type_name)).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
            self.name,
            columns.join(",\n    ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sql_for_sqlite() {
        let table = TableDefinition::new("users")
            .column(ColumnDefinition::new("email", ColumnType::Text).not_null().unique())
            .column(ColumnDefinition::new("is_active", ColumnType::Boolean).default_value("1"));

        let sql = table.create_sql(|t| t.sqlite_type());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"users\""));
        assert!(sql.contains("\"id\" TEXT PRIMARY KEY"));
        assert!(sql.contains("\"email\" TEXT NOT NULL UNIQUE"));
        assert!(sql.contains("\"is_active\" BOOLEAN DEFAULT 1"));
    }

    #[test]
    fn test_postgres_types() {
        let column = ColumnDefinition::new("metadata", ColumnType::Json);
        assert_eq!(column.to_sql(|t| t.postgres_type()), "\"metadata\" JSONB");
        assert_eq!(ColumnType::Timestamp.postgres_type(), "TIMESTAMPTZ");
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let table = TableDefinition::new("users")
            .column(ColumnDefinition::new("bad name", ColumnType::Text));
        assert!(table.validate().is_err());
    }
}
