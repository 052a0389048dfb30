//! Organizations.

use serde_json::{Value, json};

use crate::error::StorageResult;
use crate::factory::SharedProvider;
use crate::models::{NewOrganization, Organization, OrganizationPatch};
use crate::types::{QueryOptions, Record};

use super::base::{Repository, criteria};

#[derive(Debug, Clone)]
pub struct OrganizationRepository {
    repo: Repository<Organization>,
}

impl OrganizationRepository {
    /// Creates a repository over `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            repo: Repository::new(provider),
        }
    }

    /// Looks up a organization by id.
    pub async fn find_by_id(&self, id: &str) -> StorageResult<Option<Organization>> {
        self.repo.find_by_id(id).await
    }

    /// Organizations shaped by `options`.
    pub async fn find_all(&self, options: &QueryOptions) -> StorageResult<Vec<Organization>> {
        self.repo.find_all(options).await
    }

    /// # Errors
    ///
    /// * `ConstraintViolation` - The slug is taken
    pub async fn create(&self, organization: &NewOrganization) -> StorageResult<Organization> {
        self.repo.create(organization).await
    }

    /// Merges `patch` into a stored organization.
    pub async fn update(&self, id: &str, patch: &OrganizationPatch) -> StorageResult<Organization> {
        self.repo.update(id, patch).await
    }

    /// Deletes a organization. Returns false if it was already gone.
    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        self.repo.delete(id).await
    }

    /// Counts organizations, optionally filtered by `criteria`.
    pub async fn count(&self, criteria: Option<&Record>) -> StorageResult<u64> {
        self.repo.count(criteria).await
    }

    /// Looks up an organization by its unique slug.
    pub async fn find_by_slug(&self, slug: &str) -> StorageResult<Option<Organization>> {
        self.repo.find_one(criteria([("slug", Value::from(slug))])).await
    }

    /// Organizations owned by a user.
    pub async fn find_by_owner(&self, owner_id: &str) -> StorageResult<Vec<Organization>> {
        self.repo
            .find_all(&QueryOptions::new().where_eq("owner_id", json!(owner_id)))
            .await
    }
}
