//! SQLite provider implementation.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::Value;

use crate::config::{DatabaseConfig, PoolConfig, ProviderConfig, SqliteConfig};
use crate::core::{
    DataAccess, DatabaseProvider, PoolStats, ProviderCapability, ProviderKind, ProviderStats,
    ProviderTransaction,
};
use crate::error::{BackendError, ConfigError, StorageError, StorageResult};
use crate::types::{
    ColumnDefinition, QueryOptions, Record, TableDefinition, stamp_new, stamp_update,
};

use super::schema;
use super::statements::{self, ColumnCache};
use super::transaction::SqliteTransaction;

const BACKEND: &str = "sqlite";

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

const CAPABILITIES: &[ProviderCapability] = &[
    ProviderCapability::Crud,
    ProviderCapability::Bulk,
    ProviderCapability::Ordering,
    ProviderCapability::Pagination,
    ProviderCapability::Projection,
    ProviderCapability::RangeQueries,
    ProviderCapability::Transactions,
    ProviderCapability::RawSql,
    ProviderCapability::SchemaDdl,
];

pub(crate) type SqlitePool = Pool<SqliteConnectionManager>;

/// SQLite provider backed by an r2d2 connection pool.
///
/// Blocking driver calls run on the tokio blocking pool. An in-memory
/// database uses a single long-lived connection, so every caller sees the
/// same data for as long as the provider stays connected.
pub struct SqliteProvider {
    config: SqliteConfig,
    pool_config: PoolConfig,
    connect_timeout: Duration,
    pool: RwLock<Option<SqlitePool>>,
    columns: Arc<ColumnCache>,
}

impl Debug for SqliteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteProvider")
            .field("path", &self.config.path)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SqliteProvider {
    /// Creates an unconnected provider.
    pub fn new(config: SqliteConfig, pool_config: PoolConfig, connect_timeout: Duration) -> Self {
        Self {
            config,
            pool_config,
            connect_timeout,
            pool: RwLock::new(None),
            columns: Arc::new(ColumnCache::default()),
        }
    }

    /// Creates an unconnected provider from a full configuration.
    pub fn from_config(config: &DatabaseConfig) -> StorageResult<Self> {
        match &config.provider {
            ProviderConfig::Sqlite(sqlite) => Ok(Self::new(
                sqlite.clone(),
                config.pool,
                config.connect_timeout(),
            )),
            other => Err(ConfigError::InvalidValue {
                key: "DATABASE_PROVIDER".to_string(),
                value: other.kind().to_string(),
                reason: "expected sqlite".to_string(),
            }
            .into()),
        }
    }

    /// Creates and connects an in-memory provider.
    pub async fn in_memory() -> StorageResult<Self> {
        let provider = Self::new(
            SqliteConfig::new(":memory:"),
            PoolConfig::default(),
            Duration::from_secs(5),
        );
        provider.connect().await?;
        Ok(provider)
    }

    /// Creates and connects a file-backed provider.
    pub async fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let provider = Self::new(
            SqliteConfig::new(path.as_ref().to_string_lossy()),
            PoolConfig::default(),
            Duration::from_secs(5),
        );
        provider.connect().await?;
        Ok(provider)
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.config.is_memory()
    }

    fn build_pool(
        config: &SqliteConfig,
        pool_config: &PoolConfig,
        connect_timeout: Duration,
    ) -> StorageResult<SqlitePool> {
        let is_memory = config.is_memory();

        let manager = if is_memory {
            SqliteConnectionManager::memory()
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StorageError::Backend(BackendError::ConnectionFailed {
                            backend_name: BACKEND.to_string(),
                            message: format!("cannot create {}: {}", parent.display(), e),
                        })
                    })?;
                }
            }
            SqliteConnectionManager::file(&config.path)
        };

        let manager = manager.with_init(move |conn: &mut Connection| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            if !is_memory {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            Ok(())
        });

        let builder = if is_memory {
            // One connection owns the whole database; it must never be recycled.
            Pool::builder()
                .max_size(1)
                .min_idle(Some(1))
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            Pool::builder()
                .max_size(pool_config.max)
                .min_idle(Some(pool_config.min.min(pool_config.max)))
                .idle_timeout(Some(pool_config.idle_timeout()))
        };

        builder
            .connection_timeout(connect_timeout.min(pool_config.acquire_timeout()))
            .build(manager)
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: BACKEND.to_string(),
                    message: e.to_string(),
                })
            })
    }

    /// Returns the open pool, or an error if not connected.
    pub(crate) fn pool(&self) -> StorageResult<SqlitePool> {
        self.pool.read().clone().ok_or_else(|| {
            StorageError::Backend(BackendError::Unavailable {
                backend_name: BACKEND.to_string(),
                message: "provider is not connected".to_string(),
            })
        })
    }

    /// Runs `f` on a pooled connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &ColumnCache) -> StorageResult<T> + Send + 'static,
    {
        let pool = self.pool()?;
        let columns = self.columns.clone();
        run_blocking(move || {
            let conn = get_connection(&pool)?;
            f(&conn, &columns)
        })
        .await
    }
}

pub(crate) fn get_connection(
    pool: &SqlitePool,
) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
    pool.get().map_err(|e| {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: format!("{} ({})", BACKEND, e),
        })
    })
}

/// Runs a blocking closure on the tokio blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        StorageError::Backend(BackendError::Internal {
            backend_name: BACKEND.to_string(),
            message: format!("blocking task failed: {}", e),
            source: Some(Box::new(e)),
        })
    })?
}

#[async_trait]
impl DataAccess for SqliteProvider {
    async fn find_by_id(&self, table: &str, id: &str) -> StorageResult<Option<Record>> {
        let (table, id) = (table.to_string(), id.to_string());
        self.with_conn(move |conn, columns| statements::find_by_id(conn, columns, &table, &id))
            .await
    }

    async fn find_all(&self, table: &str, options: &QueryOptions) -> StorageResult<Vec<Record>> {
        let (table, options) = (table.to_string(), options.clone());
        self.with_conn(move |conn, columns| statements::find_all(conn, columns, &table, &options))
            .await
    }

    async fn create(&self, table: &str, data: Record) -> StorageResult<Record> {
        let table = table.to_string();
        let data = stamp_new(data);
        self.with_conn(move |conn, columns| statements::insert(conn, columns, &table, &data))
            .await
    }

    async fn update(&self, table: &str, id: &str, partial: Record) -> StorageResult<Record> {
        let (table, id) = (table.to_string(), id.to_string());
        let partial = stamp_update(partial);
        self.with_conn(move |conn, columns| {
            statements::update(conn, columns, &table, &id, &partial)
        })
        .await
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        let (table, id) = (table.to_string(), id.to_string());
        self.with_conn(move |conn, _| statements::delete(conn, &table, &id))
            .await
    }

    async fn count(&self, table: &str, criteria: Option<&Record>) -> StorageResult<u64> {
        let (table, criteria) = (table.to_string(), criteria.cloned());
        self.with_conn(move |conn, _| statements::count(conn, &table, criteria.as_ref()))
            .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
        let (sql, params) = (sql.to_string(), params.to_vec());
        self.with_conn(move |conn, _| statements::query(conn, &sql, &params))
            .await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StorageResult<u64> {
        let (sql, params) = (sql.to_string(), params.to_vec());
        self.with_conn(move |conn, columns| statements::execute(conn, columns, &sql, &params))
            .await
    }
}

#[async_trait]
impl DatabaseProvider for SqliteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sqlite
    }

    fn capabilities(&self) -> &'static [ProviderCapability] {
        CAPABILITIES
    }

    async fn connect(&self) -> StorageResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let config = self.config.clone();
        let pool_config = self.pool_config;
        let timeout = self.connect_timeout;
        let attempt = run_blocking(move || Self::build_pool(&config, &pool_config, timeout));

        let pool = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| {
                StorageError::Backend(BackendError::Timeout {
                    backend_name: BACKEND.to_string(),
                    operation: "connect".to_string(),
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                })
            })??;

        let mut slot = self.pool.write();
        if slot.is_none() {
            *slot = Some(pool);
            tracing::info!(path = %self.config.path, "sqlite provider connected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        if self.pool.write().take().is_some() {
            self.columns.invalidate(None);
            tracing::info!(path = %self.config.path, "sqlite provider disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool.read().is_some()
    }

    async fn ping(&self) -> bool {
        let probe = self.with_conn(|conn, _| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| statements::classify("<ping>", e))
        });

        match tokio::time::timeout(self.connect_timeout, probe).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "sqlite ping failed");
                false
            }
            Err(_) => {
                tracing::debug!("sqlite ping timed out");
                false
            }
        }
    }

    async fn begin_transaction(&self) -> StorageResult<Box<dyn ProviderTransaction>> {
        let pool = self.pool()?;
        let columns = self.columns.clone();
        let tx = run_blocking(move || {
            let conn = get_connection(&pool)?;
            SqliteTransaction::begin(conn, columns)
        })
        .await?;
        Ok(Box::new(tx))
    }

    async fn has_table(&self, table: &str) -> StorageResult<bool> {
        let table = table.to_string();
        self.with_conn(move |conn, _| schema::has_table(conn, &table))
            .await
    }

    async fn create_table(&self, definition: &TableDefinition) -> StorageResult<()> {
        let definition = definition.clone();
        self.with_conn(move |conn, columns| {
            schema::create_table(conn, &definition)?;
            columns.invalidate(Some(&definition.name));
            Ok(())
        })
        .await
    }

    async fn drop_table(&self, table: &str) -> StorageResult<()> {
        let table = table.to_string();
        self.with_conn(move |conn, columns| {
            schema::drop_table(conn, &table)?;
            columns.invalidate(Some(&table));
            Ok(())
        })
        .await
    }

    async fn add_column(&self, table: &str, column: &ColumnDefinition) -> StorageResult<()> {
        let (table, column) = (table.to_string(), column.clone());
        self.with_conn(move |conn, columns| {
            schema::add_column(conn, &table, &column)?;
            columns.invalidate(Some(&table));
            Ok(())
        })
        .await
    }

    async fn drop_column(&self, table: &str, column: &str) -> StorageResult<()> {
        let (table, column) = (table.to_string(), column.to_string());
        self.with_conn(move |conn, columns| {
            schema::drop_column(conn, &table, &column)?;
            columns.invalidate(Some(&table));
            Ok(())
        })
        .await
    }

    async fn stats(&self) -> StorageResult<ProviderStats> {
        let pool = self.pool.read().as_ref().map(|pool| {
            let state = pool.state();
            PoolStats {
                size: state.connections,
                idle: state.idle_connections,
                max_size: pool.max_size(),
            }
        });

        Ok(ProviderStats {
            provider: self.name().to_string(),
            connected: pool.is_some(),
            pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProviderExt;
    use crate::error::ErrorKind;
    use crate::types::ColumnType;
    use futures::FutureExt;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn provider_with_table() -> SqliteProvider {
        let provider = SqliteProvider::in_memory().await.unwrap();
        let table = TableDefinition::new("gadgets")
            .column(ColumnDefinition::new("name", ColumnType::Text).not_null().unique())
            .column(ColumnDefinition::new("active", ColumnType::Boolean));
        provider.create_table(&table).await.unwrap();
        provider
    }

    #[tokio::test]
    async fn test_in_memory_is_connected() {
        let provider = SqliteProvider::in_memory().await.unwrap();
        assert!(provider.is_connected());
        assert!(provider.is_memory());
        assert!(provider.ping().await);
    }

    #[tokio::test]
    async fn test_operations_after_disconnect_fail_with_connection_kind() {
        let provider = provider_with_table().await;
        provider.disconnect().await.unwrap();
        provider.disconnect().await.unwrap();

        assert!(!provider.ping().await);
        let err = provider.find_by_id("gadgets", "1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_create_assigns_metadata_and_decodes_booleans() {
        let provider = provider_with_table().await;
        let created = provider
            .create("gadgets", record(json!({"id": "mine", "name": "rotor", "active": true})))
            .await
            .unwrap();

        assert_ne!(created["id"], json!("mine"));
        assert_eq!(created["active"], json!(true));

        let found = provider
            .find_by_id("gadgets", created["id"].as_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let provider = provider_with_table().await;

        let result: StorageResult<()> = provider
            .transaction(|tx| {
                async move {
                    tx.create("gadgets", record(json!({"name": "a"}))).await?;
                    tx.create("gadgets", record(json!({"name": "a"}))).await?;
                    Ok(())
                }
                .boxed()
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
        assert_eq!(provider.count("gadgets", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bulk_create_is_all_or_nothing() {
        let provider = provider_with_table().await;
        let rows = vec![
            record(json!({"name": "x"})),
            record(json!({"name": "y"})),
            record(json!({"name": "x"})),
        ];
        assert!(provider.bulk_create("gadgets", rows).await.is_err());
        assert_eq!(provider.count("gadgets", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats_reports_pool() {
        let provider = SqliteProvider::in_memory().await.unwrap();
        let stats = provider.stats().await.unwrap();
        assert_eq!(stats.provider, "sqlite");
        assert!(stats.connected);
        assert_eq!(stats.pool.unwrap().max_size, 1);
    }
}
