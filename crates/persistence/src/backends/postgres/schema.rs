//! PostgreSQL table DDL.

use tokio_postgres::Client;

use crate::error::StorageResult;
use crate::types::{ColumnDefinition, TableDefinition, check_identifier};

use super::statements::classify;

/// Returns true if the table exists in the session's current schema.
pub async fn has_table(client: &Client, table: &str) -> StorageResult<bool> {
    check_identifier(table)?;
    let row = client
        .query_one(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )",
            &[&table],
        )
        .await
        .map_err(|e| classify(table, e))?;
    row.try_get(0).map_err(|e| classify(table, e))
}

/// Creates a table if it does not exist.
pub async fn create_table(client: &Client, definition: &TableDefinition) -> StorageResult<()> {
    definition.validate()?;
    let sql = definition.create_sql(|t| t.postgres_type());
    client
        .batch_execute(&sql)
        .await
        .map_err(|e| classify(&definition.name, e))?;
    tracing::debug!(table = %definition.name, "postgres table ensured");
    Ok(())
}

/// Drops a table if it exists.
pub async fn drop_table(client: &Client, table: &str) -> StorageResult<()> {
    check_identifier(table)?;
    client
        .batch_execute(&format!("DROP TABLE IF EXISTS \"{}\"", table))
        .await
        .map_err(|e| classify(table, e))
}

/// Adds a column if it does not exist.
pub async fn add_column(
    client: &Client,
    table: &str,
    column: &ColumnDefinition,
) -> StorageResult<()> {
    check_identifier(table)?;
    check_identifier(&column.name)?;
    let sql = format!(
        "ALTER TABLE \"{}\" ADD COLUMN IF NOT EXISTS {}",
        table,
        column.to_sql(|t| t.postgres_type())
    );
    client.batch_execute(&sql).await.map_err(|e| classify(table, e))
}

/// Drops a column if it exists.
pub async fn drop_column(client: &Client, table: &str, column: &str) -> StorageResult<()> {
    check_identifier(table)?;
    check_identifier(column)?;
    let sql = format!("ALTER TABLE \"{}\" DROP COLUMN IF EXISTS \"{}\"", table, column);
    client.batch_execute(&sql).await.map_err(|e| classify(table, e))
}
