//! Transaction support for the SQLite provider.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::Value;

use crate::core::{DataAccess, ProviderTransaction};
use crate::error::{StorageError, StorageResult, TransactionError};
use crate::types::{QueryOptions, Record, stamp_new, stamp_update};

use super::backend::run_blocking;
use super::statements::{self, ColumnCache};

type SharedConnection = Arc<Mutex<Option<PooledConnection<SqliteConnectionManager>>>>;

/// A SQLite transaction holding one pooled connection.
///
/// The connection goes back to the pool on commit, rollback or drop.
pub struct SqliteTransaction {
    conn: SharedConnection,
    columns: Arc<ColumnCache>,
}

impl std::fmt::Debug for SqliteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTransaction")
            .field("active", &self.conn.lock().is_some())
            .finish()
    }
}

impl SqliteTransaction {
    /// Starts a write transaction on `conn`. Blocking.
    pub(crate) fn begin(
        conn: PooledConnection<SqliteConnectionManager>,
        columns: Arc<ColumnCache>,
    ) -> StorageResult<Self> {
        // IMMEDIATE takes the write lock up front so concurrent writers queue
        // on busy_timeout instead of failing at commit.
        conn.execute_batch("BEGIN IMMEDIATE").map_err(|e| {
            StorageError::Transaction(TransactionError::Failed {
                reason: format!("failed to begin transaction: {}", e),
            })
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            columns,
        })
    }

    /// Runs `f` against the pinned connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &ColumnCache) -> StorageResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let columns = self.columns.clone();
        run_blocking(move || {
            let guard = conn.lock();
            let conn = guard
                .as_ref()
                .ok_or(StorageError::Transaction(TransactionError::InvalidTransaction))?;
            f(conn, &columns)
        })
        .await
    }

    async fn finish(&self, statement: &'static str) -> StorageResult<()> {
        let conn = self.conn.clone();
        run_blocking(move || {
            let conn = conn
                .lock()
                .take()
                .ok_or(StorageError::Transaction(TransactionError::InvalidTransaction))?;
            conn.execute_batch(statement).map_err(|e| {
                StorageError::Transaction(TransactionError::Failed {
                    reason: format!("{} failed: {}", statement, e),
                })
            })
        })
        .await
    }
}

#[async_trait]
impl DataAccess for SqliteTransaction {
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
impl ProviderTransaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.lock().take() {
            tracing::debug!("sqlite transaction dropped while active, rolling back");
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "rollback of abandoned sqlite transaction failed");
            }
        }
    }
}
