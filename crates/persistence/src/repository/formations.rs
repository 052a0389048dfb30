//! Formation library.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{StorageError, StorageResult};
use crate::factory::SharedProvider;
use crate::models::{Formation, FormationPatch, NewFormation};
use crate::types::{OrderBy, QueryOptions, Record};

use super::base::{Repository, criteria, invariant};

const MAX_RATING: f64 = 5.0;

/// Result of [`FormationRepository::import_missing`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    /// Rows inserted by this import.
    pub created: Vec<Formation>,
    /// Inputs skipped as duplicates.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct FormationRepository {
    repo: Repository<Formation>,
}

impl FormationRepository {
    /// Creates a repository over `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            repo: Repository::new(provider),
        }
    }

    /// The untyped table binding.
    pub fn raw(&self) -> &Repository<Formation> {
        &self.repo
    }

    /// Looks up a formation by id.
    pub async fn find_by_id(&self, id: &str) -> StorageResult<Option<Formation>> {
        self.repo.find_by_id(id).await
    }

    /// Formations shaped by `options`.
    pub async fn find_all(&self, options: &QueryOptions) -> StorageResult<Vec<Formation>> {
        self.repo.find_all(options).await
    }

    /// Inserts a formation. The provider assigns id and timestamps.
    pub async fn create(&self, formation: &NewFormation) -> StorageResult<Formation> {
        self.repo.create(formation).await
    }

    /// Merges `patch` into a stored formation.
    pub async fn update(&self, id: &str, patch: &FormationPatch) -> StorageResult<Formation> {
        self.repo.update(id, patch).await
    }

    /// Deletes a formation. Returns false if it was already gone.
    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        self.repo.delete(id).await
    }

    /// Counts formations, optionally filtered by `criteria`.
    pub async fn count(&self, criteria: Option<&Record>) -> StorageResult<u64> {
        self.repo.count(criteria).await
    }

    /// Formations in a category.
    pub async fn find_by_category(
        &self,
        category: &str,
        options: QueryOptions,
    ) -> StorageResult<Vec<Formation>> {
        self.repo
            .find_all(&options.where_eq("category", json!(category)))
            .await
    }

    /// Formations shared publicly.
    pub async fn find_public(&self, options: QueryOptions) -> StorageResult<Vec<Formation>> {
        self.repo
            .find_all(&options.where_eq("is_public", json!(true)))
            .await
    }

    /// Formations created by a user.
    pub async fn find_by_creator(
        &self,
        user_id: &str,
        options: QueryOptions,
    ) -> StorageResult<Vec<Formation>> {
        self.repo
            .find_all(&options.where_eq("created_by", json!(user_id)))
            .await
    }

    /// Looks up a formation imported from an external library.
    pub async fn find_by_source_id(
        &self,
        source: &str,
        source_id: &str,
    ) -> StorageResult<Option<Formation>> {
        self.repo
            .find_one(criteria([
                ("source", Value::from(source)),
                ("source_id", Value::from(source_id)),
            ]))
            .await
    }

    /// Case-insensitive substring match on name and description.
    ///
    /// The contract has no text predicate, so every formation is read and
    /// filtered here. Cost grows with the size of the library.
    pub async fn search_by_name(
        &self,
        term: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Formation>> {
        let needle = term.to_lowercase();
        let all = self
            .repo
            .find_all(&QueryOptions::new().order_by(OrderBy::asc("name")))
            .await?;

        let matches = all.into_iter().filter(|f| {
            f.name.to_lowercase().contains(&needle)
                || f
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
        });

        Ok(match limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    /// Increments the download counter.
    ///
    /// Read then write; concurrent downloads of the same formation can lose
    /// an increment.
    pub async fn record_download(&self, id: &str) -> StorageResult<Formation> {
        let current = self.require(id).await?;
        let mut fields = Record::new();
        fields.insert("downloads".to_string(), json!(current.downloads + 1));
        self.repo.update_fields(id, fields).await
    }

    /// Sets the rating, which must lie in `0..=5`.
    pub async fn update_rating(&self, id: &str, rating: f64) -> StorageResult<Formation> {
        if !(0.0..=MAX_RATING).contains(&rating) {
            return Err(invariant(
                self.repo.table(),
                format!("rating {} is outside 0..={}", rating, MAX_RATING),
            ));
        }
        let mut fields = Record::new();
        fields.insert("rating".to_string(), json!(rating));
        self.repo.update_fields(id, fields).await
    }

    /// Inserts the formations of `batch` not already stored.
    ///
    /// A formation with a `(source, source_id)` pair is a duplicate when that
    /// pair is already present in the table or earlier in the batch. One
    /// without a pair is a duplicate when its case-folded name is. Skipped
    /// inputs claim nothing. The survivors go in with one bulk insert.
    pub async fn import_missing(&self, batch: Vec<NewFormation>) -> StorageResult<ImportOutcome> {
        let existing = self
            .repo
            .find_records(&QueryOptions::new().select(["name", "source", "source_id"]))
            .await?;

        let mut seen_sources: HashSet<(String, String)> = HashSet::new();
        let mut seen_names: HashSet<String> = HashSet::new();
        for record in &existing {
            if let (Some(source), Some(source_id)) = (
                record.get("source").and_then(Value::as_str),
                record.get("source_id").and_then(Value::as_str),
            ) {
                seen_sources.insert((source.to_string(), source_id.to_string()));
            }
            if let Some(name) = record.get("name").and_then(Value::as_str) {
                seen_names.insert(name.to_lowercase());
            }
        }

        let total = batch.len();
        let fresh: Vec<NewFormation> = batch
            .into_iter()
            .filter(|f| {
                let name = f.name.to_lowercase();
                let is_new = match (&f.source, &f.source_id) {
                    (Some(source), Some(source_id)) => {
                        seen_sources.insert((source.clone(), source_id.clone()))
                    }
                    _ => !seen_names.contains(&name),
                };
                if is_new {
                    seen_names.insert(name);
                }
                is_new
            })
            .collect();

        let skipped = total - fresh.len();
        let created = if fresh.is_empty() {
            Vec::new()
        } else {
            self.repo.bulk_create(&fresh).await?
        };

        tracing::info!(created = created.len(), skipped, "formation import finished");
        Ok(ImportOutcome { created, skipped })
    }

    async fn require(&self, id: &str) -> StorageResult<Formation> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found(self.repo.table(), id))
    }
}
