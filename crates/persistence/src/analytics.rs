//! Dashboard aggregations over the repositories.
//!
//! Every section of [`DashboardSummary`] is computed independently. A failing
//! section is logged, left empty and named in
//! [`DashboardSummary::partial_failures`]; it never fails the whole summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::StorageResult;
use crate::factory::SharedProvider;
use crate::models::{AnalyticsEvent, Entity, Formation, NewAnalyticsEvent};
use crate::repository::{Repositories, Repository};
use crate::types::{QueryOptions, Record};

/// Events shown in [`DashboardSummary::recent_activity`].
pub const RECENT_ACTIVITY_LIMIT: u64 = 10;

/// Formations listed in [`FormationInsights::most_downloaded`].
pub const TOP_FORMATIONS: usize = 5;

/// Group label for rows whose grouping column is null.
pub const UNSET_GROUP: &str = "none";

/// Row counts per entity table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    /// Registered accounts.
    pub users: u64,
    /// Library formations.
    pub formations: u64,
    /// Shows in any status.
    pub shows: u64,
    /// Bookings in any status.
    pub bookings: u64,
    /// Organizations.
    pub organizations: u64,
}

/// Admin dashboard snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardSummary {
    /// Row counts.
    pub totals: Totals,
    /// Users grouped by `user_type`.
    pub users_by_type: BTreeMap<String, u64>,
    /// Formations grouped by `category`.
    pub formations_by_category: BTreeMap<String, u64>,
    /// Shows grouped by `status`.
    pub shows_by_status: BTreeMap<String, u64>,
    /// Bookings grouped by `status`.
    pub bookings_by_status: BTreeMap<String, u64>,
    /// Latest analytics events, newest first.
    pub recent_activity: Vec<AnalyticsEvent>,
    /// Sections that could not be computed.
    pub partial_failures: Vec<String>,
    /// When the snapshot was taken.
    pub generated_at: Option<DateTime<Utc>>,
}

impl DashboardSummary {
    /// Returns true when every section was computed.
    pub fn is_complete(&self) -> bool {
        self.partial_failures.is_empty()
    }
}

/// Library-wide formation figures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FormationInsights {
    /// Formations in the library.
    pub total_formations: u64,
    /// Sum of download counters.
    pub total_downloads: i64,
    /// Mean over rated formations; `0.0` when none is rated.
    pub average_rating: f64,
    /// Highest download counts first.
    pub most_downloaded: Vec<Formation>,
}

/// Read-mostly analytics entry point.
#[derive(Debug, Clone)]
pub struct AnalyticsFacade {
    repos: Repositories,
}

impl AnalyticsFacade {
    /// Creates a facade over `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            repos: Repositories::new(provider),
        }
    }

    /// Creates a facade sharing existing repositories.
    pub fn from_repositories(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Computes the dashboard snapshot.
    pub async fn dashboard_summary(&self) -> DashboardSummary {
        let (
            totals,
            users_by_type,
            formations_by_category,
            shows_by_status,
            bookings_by_status,
            recent,
        ) = tokio::join!(
            self.totals(),
            group_count(self.repos.users.raw(), "user_type"),
            group_count(self.repos.formations.raw(), "category"),
            group_count(self.repos.shows.raw(), "status"),
            group_count(self.repos.bookings.raw(), "status"),
            self.repos.analytics_events.recent(RECENT_ACTIVITY_LIMIT),
        );

        let mut summary = DashboardSummary {
            generated_at: Some(Utc::now()),
            ..Default::default()
        };
        let failures = &mut summary.partial_failures;
        summary.totals = settle("totals", totals, failures);
        summary.users_by_type = settle("users_by_type", users_by_type, failures);
        summary.formations_by_category =
            settle("formations_by_category", formations_by_category, failures);
        summary.shows_by_status = settle("shows_by_status", shows_by_status, failures);
        summary.bookings_by_status = settle("bookings_by_status", bookings_by_status, failures);
        summary.recent_activity = settle("recent_activity", recent, failures);
        summary
    }

    /// Records an analytics event.
    pub async fn track_event(&self, event: &NewAnalyticsEvent) -> StorageResult<AnalyticsEvent> {
        let event = self.repos.analytics_events.record(event).await?;
        tracing::debug!(event_type = %event.event_type, event_id = %event.id, "tracked event");
        Ok(event)
    }

    /// Download and rating figures across the library.
    ///
    /// Reads every formation; the aggregation runs here, not in the backend.
    pub async fn formation_insights(&self) -> StorageResult<FormationInsights> {
        let mut formations = self.repos.formations.find_all(&QueryOptions::new()).await?;

        let total_downloads = formations.iter().map(|f| f.downloads).sum();
        let rated: Vec<f64> = formations
            .iter()
            .map(|f| f.rating)
            .filter(|r| *r > 0.0)
            .collect();
        let average_rating = if rated.is_empty() {
            0.0
        } else {
            rated.iter().sum::<f64>() / rated.len() as f64
        };

        let total_formations = formations.len() as u64;
        formations.sort_by(|a, b| b.downloads.cmp(&a.downloads));
        formations.truncate(TOP_FORMATIONS);

        Ok(FormationInsights {
            total_formations,
            total_downloads,
            average_rating,
            most_downloaded: formations,
        })
    }

    async fn totals(&self) -> StorageResult<Totals> {
        let (users, formations, shows, bookings, organizations) = tokio::try_join!(
            self.repos.users.count(None),
            self.repos.formations.count(None),
            self.repos.shows.count(None),
            self.repos.bookings.count(None),
            self.repos.organizations.count(None),
        )?;
        Ok(Totals {
            users,
            formations,
            shows,
            bookings,
            organizations,
        })
    }
}

/// Counts rows per distinct value of `column`.
async fn group_count<E: Entity>(
    repo: &Repository<E>,
    column: &str,
) -> StorageResult<BTreeMap<String, u64>> {
    let records = repo
        .find_records(&QueryOptions::new().select([column]))
        .await?;
    Ok(tally(&records, column))
}

fn tally(records: &[Record], column: &str) -> BTreeMap<String, u64> {
    let mut groups = BTreeMap::new();
    for record in records {
        let key = match record.get(column) {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => UNSET_GROUP.to_string(),
            Some(other) => other.to_string(),
        };
        *groups.entry(key).or_insert(0) += 1;
    }
    groups
}

fn settle<T: Default>(section: &str, result: StorageResult<T>, failures: &mut Vec<String>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(section, error = %err, "dashboard section failed");
            failures.push(section.to_string());
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Record {
        let mut record = Record::new();
        record.insert("category".to_string(), value);
        record
    }

    #[test]
    fn test_tally_groups_nulls() {
        let records = vec![
            row(json!("abstract")),
            row(json!("abstract")),
            row(Value::Null),
            Record::new(),
        ];
        let groups = tally(&records, "category");
        assert_eq!(groups["abstract"], 2);
        assert_eq!(groups[UNSET_GROUP], 2);
    }

    #[test]
    fn test_settle_records_failure() {
        let mut failures = Vec::new();
        let value: u64 = settle(
            "totals",
            Err(crate::error::StorageError::NotInitialized),
            &mut failures,
        );
        assert_eq!(value, 0);
        assert_eq!(failures, vec!["totals".to_string()]);
    }
}
