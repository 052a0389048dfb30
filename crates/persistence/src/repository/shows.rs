//! Shows.

use chrono::Utc;
use serde_json::json;

use crate::error::StorageResult;
use crate::factory::SharedProvider;
use crate::models::{NewShow, Show, ShowPatch, ShowStatus, timestamp};
use crate::types::{Comparison, OrderBy, QueryOptions, Record};

use super::base::Repository;

#[derive(Debug, Clone)]
pub struct ShowRepository {
    repo: Repository<Show>,
}

impl ShowRepository {
    /// Creates a repository over `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            repo: Repository::new(provider),
        }
    }

    /// The untyped table binding.
    pub fn raw(&self) -> &Repository<Show> {
        &self.repo
    }

    /// Looks up a show by id.
    pub async fn find_by_id(&self, id: &str) -> StorageResult<Option<Show>> {
        self.repo.find_by_id(id).await
    }

    /// Shows shaped by `options`.
    pub async fn find_all(&self, options: &QueryOptions) -> StorageResult<Vec<Show>> {
        self.repo.find_all(options).await
    }

    /// Inserts a show. The provider assigns id and timestamps.
    pub async fn create(&self, show: &NewShow) -> StorageResult<Show> {
        self.repo.create(show).await
    }

    /// Merges `patch` into a stored show.
    pub async fn update(&self, id: &str, patch: &ShowPatch) -> StorageResult<Show> {
        self.repo.update(id, patch).await
    }

    /// Deletes a show. Returns false if it was already gone.
    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        self.repo.delete(id).await
    }

    /// Counts shows, optionally filtered by `criteria`.
    pub async fn count(&self, criteria: Option<&Record>) -> StorageResult<u64> {
        self.repo.count(criteria).await
    }

    /// Shows in one status.
    pub async fn find_by_status(
        &self,
        status: ShowStatus,
        options: QueryOptions,
    ) -> StorageResult<Vec<Show>> {
        self.repo
            .find_all(&options.where_eq("status", json!(status.as_str())))
            .await
    }

    /// Shows run by an organization.
    pub async fn find_by_organization(
        &self,
        organization_id: &str,
        options: QueryOptions,
    ) -> StorageResult<Vec<Show>> {
        self.repo
            .find_all(&options.where_eq("organization_id", json!(organization_id)))
            .await
    }

    /// Shows scheduled after now, soonest first.
    ///
    /// Timestamps are stored in one fixed-width UTC format, so the range
    /// predicate compares correctly as text on every backend.
    pub async fn get_upcoming(&self, limit: u64) -> StorageResult<Vec<Show>> {
        let now = timestamp::format(&Utc::now());
        let options = QueryOptions::new()
            .condition("scheduled_at", Comparison::Gt, json!(now))
            .order_by(OrderBy::asc("scheduled_at"))
            .limit(limit);
        self.repo.find_all(&options).await
    }
}
