//! Callback transactions.
//!
//! [`ProviderExt::transaction`] pins a callback to one connection: every
//! operation issued through the handle it receives joins the same
//! transaction, which commits when the callback returns `Ok` and rolls back
//! when it returns `Err`.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::{StorageError, StorageResult, TransactionError};

use super::provider::{DataAccess, DatabaseProvider};

/// Convenience methods available on every provider.
#[async_trait]
pub trait ProviderExt: DatabaseProvider {
    /// Executes `f` within a transaction.
    ///
    /// If the function returns Ok, the transaction is committed.
    /// If the function returns Err, the transaction is rolled back and the
    /// error is returned wrapped in `TransactionError::Aborted`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use flock_persistence::core::ProviderExt;
    /// use futures::FutureExt;
    ///
    /// provider.transaction(move |tx| async move {
    ///     let booking = tx.create("bookings", booking).await?;
    ///     tx.update("shows", &show_id, status).await?;
    ///     Ok(booking)
    /// }.boxed()).await?;
    /// ```
    ///
    /// # Errors
    ///
    /// * `UnsupportedCapability` - The backend has no transactions
    /// * `TransactionAborted` - The callback failed and its writes were discarded
    async fn transaction<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t dyn DataAccess) -> BoxFuture<'t, StorageResult<T>> + Send,
    {
        let tx = self.begin_transaction().await?;
        let outcome = f(&*tx).await;

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(
                    provider = self.name(),
                    error = %err,
                    "transaction callback failed, rolling back"
                );
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        provider = self.name(),
                        error = %rollback_err,
                        "rollback did not complete"
                    );
                }
                Err(StorageError::Transaction(TransactionError::Aborted {
                    source: Box::new(err),
                }))
            }
        }
    }
}

impl<P: DatabaseProvider + ?Sized> ProviderExt for P {}
