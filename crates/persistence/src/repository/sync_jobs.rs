//! Import and migration job tracking.

use chrono::Utc;
use serde_json::json;

use crate::error::{StorageError, StorageResult};
use crate::factory::SharedProvider;
use crate::models::{NewSyncJob, SyncJob, SyncProgress, SyncStatus, timestamp};
use crate::types::{OrderBy, QueryOptions, Record};

use super::base::{Repository, invariant};

/// Sync jobs. Counters only move forward and a finished job is frozen.
#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    repo: Repository<SyncJob>,
}

impl SyncJobRepository {
    /// Creates a repository over `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            repo: Repository::new(provider),
        }
    }

    /// Looks up a sync job by id.
    pub async fn find_by_id(&self, id: &str) -> StorageResult<Option<SyncJob>> {
        self.repo.find_by_id(id).await
    }

    /// Creates a job record.
    ///
    /// # Errors
    ///
    /// * `ConstraintViolation` - The job starts terminal or its counters are
    ///   negative or inconsistent
    pub async fn start(&self, job: &NewSyncJob) -> StorageResult<SyncJob> {
        job.check()
            .map_err(|message| invariant(self.repo.table(), message))?;
        let job = self.repo.create(job).await?;
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            total = job.total_items,
            "sync job started"
        );
        Ok(job)
    }

    /// Stores absolute counter values.
    ///
    /// # Errors
    ///
    /// * `ConstraintViolation` - The job is finished, a counter moved
    ///   backwards, or the counters are inconsistent
    /// * `NotFound` - No such job
    pub async fn record_progress(
        &self,
        id: &str,
        progress: SyncProgress,
    ) -> StorageResult<SyncJob> {
        let job = self.require(id).await?;
        progress
            .check(&job)
            .map_err(|message| invariant(self.repo.table(), message))?;

        let mut fields = Record::new();
        fields.insert("processed_items".to_string(), json!(progress.processed_items));
        fields.insert("successful_items".to_string(), json!(progress.successful_items));
        fields.insert("failed_items".to_string(), json!(progress.failed_items));
        if job.status == SyncStatus::Pending {
            fields.insert("status".to_string(), json!(SyncStatus::Running.as_str()));
        }
        self.repo.update_fields(id, fields).await
    }

    /// Moves a job to a terminal status and stamps `completed_at`.
    pub async fn finish(
        &self,
        id: &str,
        status: SyncStatus,
        error: Option<String>,
    ) -> StorageResult<SyncJob> {
        if !status.is_terminal() {
            return Err(invariant(
                self.repo.table(),
                format!("'{}' does not finish a job", status.as_str()),
            ));
        }
        let job = self.require(id).await?;
        if job.status.is_terminal() {
            return Err(invariant(
                self.repo.table(),
                format!("job is already {}", job.status.as_str()),
            ));
        }

        let mut fields = Record::new();
        fields.insert("status".to_string(), json!(status.as_str()));
        fields.insert(
            "completed_at".to_string(),
            json!(timestamp::format(&Utc::now())),
        );
        if let Some(error) = &error {
            fields.insert("error_message".to_string(), json!(error));
        }

        let job = self.repo.update_fields(id, fields).await?;
        match &error {
            Some(error) => tracing::warn!(
                job_id = %job.id,
                status = status.as_str(),
                error = %error,
                "sync job finished"
            ),
            None => tracing::info!(
                job_id = %job.id,
                status = status.as_str(),
                processed = job.processed_items,
                "sync job finished"
            ),
        }
        Ok(job)
    }

    /// Pending and running jobs, oldest first.
    pub async fn find_active(&self) -> StorageResult<Vec<SyncJob>> {
        let mut jobs = Vec::new();
        for status in [SyncStatus::Pending, SyncStatus::Running] {
            let options = QueryOptions::new().where_eq("status", json!(status.as_str()));
            jobs.extend(self.repo.find_all(&options).await?);
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    /// Latest jobs first.
    pub async fn recent(&self, limit: u64) -> StorageResult<Vec<SyncJob>> {
        let options = QueryOptions::new()
            .order_by(OrderBy::desc("created_at"))
            .limit(limit);
        self.repo.find_all(&options).await
    }

    async fn require(&self, id: &str) -> StorageResult<SyncJob> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found(self.repo.table(), id))
    }
}
