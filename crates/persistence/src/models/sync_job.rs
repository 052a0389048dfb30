// Entity fields mirror their column names.
#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{entity, timestamp};

/// Sync job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    /// Stored value.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }

    /// `completed`, `failed` and `cancelled` end a job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }
}

/// A progress-tracked import or migration.
///
/// Counters only advance, with `processed_items <= total_items` and
/// `successful_items + failed_items <= processed_items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub job_type: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default)]
    pub total_items: i64,
    #[serde(default)]
    pub processed_items: i64,
    #[serde(default)]
    pub successful_items: i64,
    #[serde(default)]
    pub failed_items: i64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, with = "timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

entity!(SyncJob, "sync_jobs");

/// Input for starting a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSyncJob {
    pub job_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub status: SyncStatus,
    pub total_items: i64,
    pub processed_items: i64,
    pub successful_items: i64,
    pub failed_items: i64,
    #[serde(with = "timestamp::option", default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl NewSyncJob {
    /// A running job over `total_items` items, started now.
    pub fn new(job_type: impl Into<String>, source: Option<String>, total_items: i64) -> Self {
        Self {
            job_type: job_type.into(),
            source,
            status: SyncStatus::Running,
            total_items,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            started_at: Some(Utc::now()),
        }
    }

    /// Checks that a job is stored in a consistent, unfinished state.
    pub fn check(&self) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!(
                "a job cannot start as {}",
                self.status.as_str()
            ));
        }
        if self.total_items < 0 {
            return Err("total_items cannot be negative".to_string());
        }
        check_counters(
            self.total_items,
            self.processed_items,
            self.successful_items,
            self.failed_items,
        )
    }
}

fn check_counters(total: i64, processed: i64, successful: i64, failed: i64) -> Result<(), String> {
    if processed < 0 || successful < 0 || failed < 0 {
        return Err("counters cannot be negative".to_string());
    }
    if processed > total {
        return Err(format!(
            "processed_items {} exceeds total_items {}",
            processed, total
        ));
    }
    match successful.checked_add(failed) {
        Some(settled) if settled <= processed => Ok(()),
        Some(settled) => Err(format!(
            "successful_items + failed_items ({}) exceeds processed_items {}",
            settled, processed
        )),
        None => Err("successful_items + failed_items overflows".to_string()),
    }
}

/// Absolute counter values reported by a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub processed_items: i64,
    pub successful_items: i64,
    pub failed_items: i64,
}

impl SyncProgress {
    /// Checks the counter invariants against `job`.
    pub fn check(&self, job: &SyncJob) -> Result<(), String> {
        if job.status.is_terminal() {
            return Err(format!("job is already {}", job.status.as_str()));
        }
        check_counters(
            job.total_items,
            self.processed_items,
            self.successful_items,
            self.failed_items,
        )?;
        if self.processed_items < job.processed_items
            || self.successful_items < job.successful_items
            || self.failed_items < job.failed_items
        {
            return Err("counters cannot move backwards".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(total: i64, processed: i64) -> SyncJob {
        let now = Utc::now();
        SyncJob {
            id: "job".to_string(),
            job_type: "formation_import".to_string(),
            source: None,
            status: SyncStatus::Running,
            total_items: total,
            processed_items: processed,
            successful_items: processed,
            failed_items: 0,
            error_message: None,
            started_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_progress_invariants() {
        let current = job(10, 4);
        let ok = SyncProgress {
            processed_items: 6,
            successful_items: 5,
            failed_items: 1,
        };
        assert!(ok.check(&current).is_ok());

        let too_many = SyncProgress {
            processed_items: 11,
            ..ok
        };
        assert!(too_many.check(&current).is_err());

        let unbalanced = SyncProgress {
            successful_items: 6,
            failed_items: 1,
            ..ok
        };
        assert!(unbalanced.check(&current).is_err());

        let backwards = SyncProgress {
            processed_items: 3,
            successful_items: 3,
            failed_items: 0,
        };
        assert!(backwards.check(&current).is_err());
    }

    #[test]
    fn test_terminal_job_rejects_progress() {
        let mut done = job(10, 10);
        done.status = SyncStatus::Completed;
        let progress = SyncProgress {
            processed_items: 10,
            successful_items: 10,
            failed_items: 0,
        };
        assert!(progress.check(&done).is_err());
        assert!(SyncStatus::Cancelled.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
    }

    #[test]
    fn test_counter_sum_overflow_is_rejected() {
        let current = job(i64::MAX, 0);
        let progress = SyncProgress {
            processed_items: i64::MAX,
            successful_items: i64::MAX,
            failed_items: 1,
        };
        let err = progress.check(&current).unwrap_err();
        assert!(err.contains("overflows"));
    }

    #[test]
    fn test_new_job_invariants() {
        assert!(NewSyncJob::new("import", None, 10).check().is_ok());

        let mut inconsistent = NewSyncJob::new("import", None, 10);
        inconsistent.processed_items = 50;
        inconsistent.successful_items = 99;
        assert!(inconsistent.check().is_err());

        let mut finished = NewSyncJob::new("import", None, 10);
        finished.status = SyncStatus::Completed;
        assert!(finished.check().is_err());

        let mut negative = NewSyncJob::new("import", None, 10);
        negative.failed_items = -1;
        assert!(negative.check().is_err());

        assert!(NewSyncJob::new("import", None, -1).check().is_err());
    }
}
