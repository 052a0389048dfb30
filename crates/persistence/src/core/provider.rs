//! The provider contract.
//!
//! [`DataAccess`] is the CRUD surface shared by providers and by transaction
//! handles. [`DatabaseProvider`] adds lifecycle, capability discovery, bulk
//! operations, transactions and schema operations. Domain repositories depend
//! only on these traits, never on a concrete backend.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, StorageResult};
use crate::types::{ColumnDefinition, QueryOptions, Record, TableDefinition};

use super::realtime::RealtimeProvider;

/// Identifies the storage backend behind a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Embedded file-based SQL (SQLite).
    Sqlite,
    /// Managed relational service (PostgreSQL).
    Postgresql,
    /// Managed BaaS with realtime push (Supabase).
    Supabase,
}

impl ProviderKind {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Sqlite => "sqlite",
            ProviderKind::Postgresql => "postgresql",
            ProviderKind::Supabase => "supabase",
        }
    }

    /// Cargo feature that compiles this provider in.
    pub fn feature(&self) -> &'static str {
        match self {
            ProviderKind::Sqlite => "sqlite",
            ProviderKind::Postgresql => "postgres",
            ProviderKind::Supabase => "supabase",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(ProviderKind::Sqlite),
            "postgresql" | "postgres" => Ok(ProviderKind::Postgresql),
            "supabase" => Ok(ProviderKind::Supabase),
            _ => Err(ConfigError::UnsupportedProvider {
                value: s.to_string(),
            }),
        }
    }
}

/// Capabilities that a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderCapability {
    /// Single-row create, read, update, delete.
    Crud,
    /// Bulk create, update and delete.
    Bulk,
    /// Multi-key ordering.
    Ordering,
    /// Limit/offset pagination.
    Pagination,
    /// Column projection.
    Projection,
    /// Comparison conditions (`gt`, `lte`, ...).
    RangeQueries,
    /// Callback transactions.
    Transactions,
    /// Raw SQL `query`/`execute`.
    RawSql,
    /// Table and column DDL.
    SchemaDdl,
    /// Change subscriptions.
    Realtime,
}

impl fmt::Display for ProviderCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderCapability::Crud => "crud",
            ProviderCapability::Bulk => "bulk",
            ProviderCapability::Ordering => "ordering",
            ProviderCapability::Pagination => "pagination",
            ProviderCapability::Projection => "projection",
            ProviderCapability::RangeQueries => "range-queries",
            ProviderCapability::Transactions => "transactions",
            ProviderCapability::RawSql => "raw-sql",
            ProviderCapability::SchemaDdl => "schema-ddl",
            ProviderCapability::Realtime => "realtime",
        };
        write!(f, "{}", name)
    }
}

/// Connection pool figures, where the driver exposes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently open.
    pub size: u32,
    /// Open connections not checked out.
    pub idle: u32,
    /// Configured upper bound.
    pub max_size: u32,
}

/// Snapshot of a provider's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    /// Provider name.
    pub provider: String,
    /// Whether the provider currently holds a live connection.
    pub connected: bool,
    /// Pool figures, if available.
    pub pool: Option<PoolStats>,
}

/// CRUD and raw-query operations.
///
/// Implemented by every provider and by every transaction handle, so code that
/// takes `&dyn DataAccess` runs unchanged inside or outside a transaction.
///
/// Tables and columns are validated as plain identifiers before they reach a
/// backend; anything else fails with an `InvalidQuery` error.
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Reads one row by id.
    async fn find_by_id(&self, table: &str, id: &str) -> StorageResult<Option<Record>>;

    /// Reads every row matching the options.
    async fn find_all(&self, table: &str, options: &QueryOptions) -> StorageResult<Vec<Record>>;

    /// Reads rows matching equality criteria plus the options.
    async fn find_by(
        &self,
        table: &str,
        criteria: &Record,
        options: &QueryOptions,
    ) -> StorageResult<Vec<Record>> {
        let options = options.clone().with_criteria(criteria.clone());
        self.find_all(table, &options).await
    }

    /// Reads the first row matching equality criteria.
    async fn find_one(&self, table: &str, criteria: &Record) -> StorageResult<Option<Record>> {
        let options = QueryOptions::new().limit(1);
        let rows = self.find_by(table, criteria, &options).await?;
        Ok(rows.into_iter().next())
    }

    /// Inserts a row and returns it as stored.
    ///
    /// `id`, `created_at` and `updated_at` are always assigned by the layer.
    ///
    /// # Errors
    ///
    /// * `ConstraintViolation` - A unique or not-null column was violated
    async fn create(&self, table: &str, data: Record) -> StorageResult<Record>;

    /// Merges `partial` into an existing row and returns the result.
    ///
    /// # Errors
    ///
    /// * `NotFound` - No row has this id
    /// * `ConstraintViolation` - The merge violates a declared constraint
    async fn update(&self, table: &str, id: &str, partial: Record) -> StorageResult<Record>;

    /// Deletes a row. Returns `false` if the id did not exist.
    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool>;

    /// Counts rows, optionally matching equality criteria.
    async fn count(&self, table: &str, criteria: Option<&Record>) -> StorageResult<u64>;

    /// Runs a raw SQL query and returns its rows.
    async fn query(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>>;

    /// Runs a raw SQL statement and returns the affected row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> StorageResult<u64>;
}

/// An open transaction pinned to one connection.
///
/// Dropping a handle that was neither committed nor rolled back rolls it back.
#[async_trait]
pub trait ProviderTransaction: DataAccess {
    /// Commits every write made through this handle.
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards every write made through this handle.
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// A storage backend usable by domain repositories.
///
/// # Example
///
/// ```ignore
/// use flock_persistence::core::{DatabaseProvider, ProviderCapability};
///
/// async fn describe(provider: &dyn DatabaseProvider) {
///     println!("{} connected={}", provider.name(), provider.is_connected());
///     if provider.supports(ProviderCapability::Realtime) {
///         let realtime = provider.as_realtime().unwrap();
///         // subscribe to changes ...
///     }
/// }
/// ```
#[async_trait]
pub trait DatabaseProvider: DataAccess {
    /// The backend behind this provider.
    fn kind(&self) -> ProviderKind;

    /// Provider name, as used in logs and health reports.
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Every capability this provider supports.
    fn capabilities(&self) -> &'static [ProviderCapability];

    /// Returns true if the capability is supported.
    fn supports(&self, capability: ProviderCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Opens the connection pool. Bounded by the configured connect timeout.
    async fn connect(&self) -> StorageResult<()>;

    /// Closes the connection pool. Calling it twice is harmless.
    async fn disconnect(&self) -> StorageResult<()>;

    /// Returns true while a pool is open.
    fn is_connected(&self) -> bool;

    /// Performs a time-bounded round-trip. Never errors; returns `false`
    /// when the backend cannot be reached.
    async fn ping(&self) -> bool;

    /// Begins a transaction on a dedicated connection.
    ///
    /// # Errors
    ///
    /// * `UnsupportedCapability` - The backend has no transactions
    async fn begin_transaction(&self) -> StorageResult<Box<dyn ProviderTransaction>>;

    /// Inserts every row or none.
    async fn bulk_create(&self, table: &str, rows: Vec<Record>) -> StorageResult<Vec<Record>> {
        let tx = self.begin_transaction().await?;
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            match tx.create(table, row).await {
                Ok(record) => created.push(record),
                Err(err) => {
                    abandon(tx, table, "bulk_create").await;
                    return Err(err);
                }
            }
        }
        tx.commit().await?;
        Ok(created)
    }

    /// Applies every `(id, partial)` update or none.
    async fn bulk_update(
        &self,
        table: &str,
        updates: Vec<(String, Record)>,
    ) -> StorageResult<Vec<Record>> {
        let tx = self.begin_transaction().await?;
        let mut updated = Vec::with_capacity(updates.len());
        for (id, partial) in updates {
            match tx.update(table, &id, partial).await {
                Ok(record) => updated.push(record),
                Err(err) => {
                    abandon(tx, table, "bulk_update").await;
                    return Err(err);
                }
            }
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// Deletes every listed id in one unit. Returns how many existed.
    async fn bulk_delete(&self, table: &str, ids: &[String]) -> StorageResult<u64> {
        let tx = self.begin_transaction().await?;
        let mut deleted = 0;
        for id in ids {
            match tx.delete(table, id).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    abandon(tx, table, "bulk_delete").await;
                    return Err(err);
                }
            }
        }
        tx.commit().await?;
        Ok(deleted)
    }

    /// Returns the realtime interface, if this provider has one.
    fn as_realtime(&self) -> Option<&dyn RealtimeProvider> {
        None
    }

    /// Returns true if the table exists.
    async fn has_table(&self, table: &str) -> StorageResult<bool>;

    /// Creates a table if it does not exist.
    async fn create_table(&self, definition: &TableDefinition) -> StorageResult<()>;

    /// Drops a table if it exists.
    async fn drop_table(&self, table: &str) -> StorageResult<()>;

    /// Adds a column to an existing table.
    async fn add_column(&self, table: &str, column: &ColumnDefinition) -> StorageResult<()>;

    /// Removes a column from an existing table.
    async fn drop_column(&self, table: &str, column: &str) -> StorageResult<()>;

    /// Returns a snapshot of provider state.
    async fn stats(&self) -> StorageResult<ProviderStats>;
}

impl fmt::Debug for dyn DatabaseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseProvider")
            .field("name", &self.name())
            .finish()
    }
}

async fn abandon(tx: Box<dyn ProviderTransaction>, table: &str, operation: &str) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(
            table,
            operation,
            error = %err,
            "rollback after failed batch did not complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("sqlite".parse::<ProviderKind>().unwrap(), ProviderKind::Sqlite);
        assert_eq!("postgres".parse::<ProviderKind>().unwrap(), ProviderKind::Postgresql);
        assert_eq!(" PostgreSQL ".parse::<ProviderKind>().unwrap(), ProviderKind::Postgresql);
        assert_eq!("supabase".parse::<ProviderKind>().unwrap(), ProviderKind::Supabase);

        let err = "mysql".parse::<ProviderKind>().unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnsupportedProvider {
                value: "mysql".to_string()
            }
        );
    }

    #[test]
    fn test_provider_kind_display() {
        assert_eq!(ProviderKind::Postgresql.to_string(), "postgresql");
        assert_eq!(ProviderKind::Postgresql.feature(), "postgres");
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(ProviderCapability::RangeQueries.to_string(), "range-queries");
        assert_eq!(ProviderCapability::RawSql.to_string(), "raw-sql");
    }
}
