//! Change subscriptions for providers with push support.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::StorageResult;
use crate::types::Record;

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// One change delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the change happened on.
    pub table: String,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Row after the change (absent for deletes).
    pub new: Option<Record>,
    /// Row before the change, when the backend reports it.
    pub old: Option<Record>,
    /// Commit time reported by the backend.
    pub commit_timestamp: Option<String>,
}

/// Callback invoked for every change.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// A provider that can push row changes to subscribers.
#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    /// Starts delivering changes on `table` to `callback`.
    ///
    /// Delivery stops when the returned [`Subscription`] is unsubscribed or
    /// dropped.
    async fn subscribe(&self, table: &str, callback: ChangeCallback) -> StorageResult<Subscription>;
}

/// Handle for an active change subscription.
pub struct Subscription {
    table: String,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wraps the task that delivers changes for `table`.
    pub fn new(table: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            table: table.into(),
            task: Some(task),
        }
    }

    /// Table this subscription listens on.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns true while changes are still being delivered.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops delivery.
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(table = %self.table, "realtime subscription stopped");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unsubscribe_stops_task() {
        let task = tokio::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        let subscription = Subscription::new("shows", task);
        assert!(subscription.is_active());
        assert_eq!(subscription.table(), "shows");
        subscription.unsubscribe();
    }

    #[test]
    fn test_change_type_serialization() {
        let json = serde_json::to_string(&ChangeType::Insert).unwrap();
        assert_eq!(json, "\"INSERT\"");
    }
}
