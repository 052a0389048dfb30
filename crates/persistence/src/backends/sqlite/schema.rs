//! SQLite schema operations.

use rusqlite::Connection;

use crate::error::StorageResult;
use crate::types::{ColumnDefinition, TableDefinition, check_identifier};

use super::statements::classify;

/// Returns true if the table exists.
pub fn has_table(conn: &Connection, table: &str) -> StorageResult<bool> {
    check_identifier(table)?;
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .map_err(|e| classify(table, e))?;
    Ok(count > 0)
}

/// Creates a table if it does not exist.
pub fn create_table(conn: &Connection, definition: &TableDefinition) -> StorageResult<()> {
    definition.validate()?;
    let sql = definition.create_sql(|t| t.sqlite_type());
    conn.execute_batch(&sql)
        .map_err(|e| classify(&definition.name, e))?;
    tracing::debug!(table = %definition.name, "sqlite table ensured");
    Ok(())
}

/// Drops a table if it exists.
pub fn drop_table(conn: &Connection, table: &str) -> StorageResult<()> {
    check_identifier(table)?;
    conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", table))
        .map_err(|e| classify(table, e))
}

/// Adds a column. SQLite cannot add PRIMARY KEY or UNIQUE columns this way.
pub fn add_column(conn: &Connection, table: &str, column: &ColumnDefinition) -> StorageResult<()> {
    check_identifier(table)?;
    check_identifier(&column.name)?;
    let sql = format!(
        "ALTER TABLE \"{}\" ADD COLUMN {}",
        table,
        column.to_sql(|t| t.sqlite_type())
    );
    conn.execute_batch(&sql).map_err(|e| classify(table, e))
}

/// Drops a column.
pub fn drop_column(conn: &Connection, table: &str, column: &str) -> StorageResult<()> {
    check_identifier(table)?;
    check_identifier(column)?;
    let sql = format!("ALTER TABLE \"{}\" DROP COLUMN \"{}\"", table, column);
    conn.execute_batch(&sql).map_err(|e| classify(table, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    #[test]
    fn test_table_lifecycle() {
        let conn = Connection::open_in_memory().unwrap();
        let table = TableDefinition::new("crews")
            .column(ColumnDefinition::new("name", ColumnType::Text).not_null());

        assert!(!has_table(&conn, "crews").unwrap());
        create_table(&conn, &table).unwrap();
        create_table(&conn, &table).unwrap();
        assert!(has_table(&conn, "crews").unwrap());

        add_column(&conn, "crews", &ColumnDefinition::new("size", ColumnType::Integer)).unwrap();
        drop_column(&conn, "crews", "size").unwrap();

        drop_table(&conn, "crews").unwrap();
        assert!(!has_table(&conn, "crews").unwrap());
    }

    #[test]
    fn test_rejects_invalid_table_name() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(has_table(&conn, "crews; --").is_err());
    }
}
