//! Transaction support for the PostgreSQL provider.

use async_trait::async_trait;
use deadpool_postgres::Client;
use serde_json::Value;

use crate::core::{DataAccess, ProviderTransaction};
use crate::error::{StorageError, StorageResult, TransactionError};
use crate::types::{QueryOptions, Record, stamp_new, stamp_update};

use super::statements;

/// A PostgreSQL transaction.
///
/// Wraps a pooled client that has an active transaction. A handle dropped
/// without commit or rollback detaches its connection from the pool; closing
/// the session makes the server discard the open transaction.
pub struct PostgresTransaction {
    /// Option so we can take it during commit/rollback.
    client: Option<Client>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction")
            .field("active", &self.client.is_some())
            .finish()
    }
}

impl PostgresTransaction {
    /// Starts a transaction on `client`.
    pub(crate) async fn begin(client: Client) -> StorageResult<Self> {
        client.batch_execute("BEGIN").await.map_err(|e| {
            StorageError::Transaction(TransactionError::Failed {
                reason: format!("failed to begin transaction: {}", e),
            })
        })?;

        Ok(Self {
            client: Some(client),
        })
    }

    fn client(&self) -> StorageResult<&Client> {
        self.client
            .as_ref()
            .ok_or(StorageError::Transaction(TransactionError::InvalidTransaction))
    }

    async fn finish(mut self: Box<Self>, statement: &'static str) -> StorageResult<()> {
        let client = self
            .client
            .take()
            .ok_or(StorageError::Transaction(TransactionError::InvalidTransaction))?;

        client.batch_execute(statement).await.map_err(|e| {
            StorageError::Transaction(TransactionError::Failed {
                reason: format!("{} failed: {}", statement, e),
            })
        })
    }
}

#[async_trait]
impl DataAccess for PostgresTransaction {
    async fn find_by_id(&self, table: &str, id: &str) -> StorageResult<Option<Record>> {
        statements::find_by_id(self.client()?, table, id).await
    }

    async fn find_all(&self, table: &str, options: &QueryOptions) -> StorageResult<Vec<Record>> {
        statements::find_all(self.client()?, table, options).await
    }

    async fn create(&self, table: &str, data: Record) -> StorageResult<Record> {
        statements::insert(self.client()?, table, stamp_new(data)).await
    }

    async fn update(&self, table: &str, id: &str, partial: Record) -> StorageResult<Record> {
        statements::update(self.client()?, table, id, stamp_update(partial)).await
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        statements::delete(self.client()?, table, id).await
    }

    async fn count(&self, table: &str, criteria: Option<&Record>) -> StorageResult<u64> {
        statements::count(self.client()?, table, criteria).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
        statements::query(self.client()?, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> StorageResult<u64> {
        statements::execute(self.client()?, sql, params).await
    }
}

#[async_trait]
impl ProviderTransaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::warn!(
                "postgres transaction dropped without commit or rollback, discarding connection"
            );
            drop(deadpool_postgres::Object::take(client));
        }
    }
}
