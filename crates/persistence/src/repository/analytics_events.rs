//! Append-only analytics events.

use serde_json::{Value, json};

use crate::error::StorageResult;
use crate::factory::SharedProvider;
use crate::models::{AnalyticsEvent, NewAnalyticsEvent};
use crate::types::{OrderBy, QueryOptions};

use super::base::{Repository, criteria};

/// Events are written once and never updated or deleted through this type.
#[derive(Debug, Clone)]
pub struct AnalyticsEventRepository {
    repo: Repository<AnalyticsEvent>,
}

impl AnalyticsEventRepository {
    /// Creates a repository over `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            repo: Repository::new(provider),
        }
    }

    /// Stores an event.
    pub async fn record(&self, event: &NewAnalyticsEvent) -> StorageResult<AnalyticsEvent> {
        self.repo.create(event).await
    }

    /// Events of one type.
    pub async fn find_by_type(
        &self,
        event_type: &str,
        options: QueryOptions,
    ) -> StorageResult<Vec<AnalyticsEvent>> {
        self.repo
            .find_all(&options.where_eq("event_type", json!(event_type)))
            .await
    }

    /// Events about one entity, oldest first.
    pub async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StorageResult<Vec<AnalyticsEvent>> {
        let options = QueryOptions::new()
            .with_criteria(criteria([
                ("entity_type", Value::from(entity_type)),
                ("entity_id", Value::from(entity_id)),
            ]))
            .order_by(OrderBy::asc("created_at"));
        self.repo.find_all(&options).await
    }

    /// Latest events first.
    pub async fn recent(&self, limit: u64) -> StorageResult<Vec<AnalyticsEvent>> {
        let options = QueryOptions::new()
            .order_by(OrderBy::desc("created_at"))
            .limit(limit);
        self.repo.find_all(&options).await
    }

    /// Number of events of one type.
    pub async fn count_by_type(&self, event_type: &str) -> StorageResult<u64> {
        let criteria = criteria([("event_type", Value::from(event_type))]);
        self.repo.count(Some(&criteria)).await
    }
}
