//! User accounts.

use chrono::Utc;
use serde_json::{Value, json};

use crate::error::StorageResult;
use crate::factory::SharedProvider;
use crate::models::{NewUser, User, UserPatch, UserType, timestamp};
use crate::schema;
use crate::types::{QueryOptions, Record};

use super::base::{Repository, criteria};

/// Columns never returned by [`UserRepository::list`] unless asked for.
pub const SENSITIVE_COLUMNS: &[&str] = &["password_hash"];

/// Accounts. Users are deactivated, never deleted.
#[derive(Debug, Clone)]
pub struct UserRepository {
    repo: Repository<User>,
}

impl UserRepository {
    /// Creates a repository over `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            repo: Repository::new(provider),
        }
    }

    /// The untyped table binding.
    pub fn raw(&self) -> &Repository<User> {
        &self.repo
    }

    /// Full row, including the credential hash.
    pub async fn find_by_id(&self, id: &str) -> StorageResult<Option<User>> {
        self.repo.find_by_id(id).await
    }

    /// Full row, including the credential hash, for authentication.
    pub async fn find_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        self.repo
            .find_one(criteria([("email", Value::from(email))]))
            .await
    }

    /// Lists users. Sensitive columns are projected out unless
    /// `include_sensitive` is set.
    pub async fn list(
        &self,
        options: QueryOptions,
        include_sensitive: bool,
    ) -> StorageResult<Vec<User>> {
        let options = if include_sensitive {
            options
        } else {
            redact(options)
        };
        self.repo.find_all(&options).await
    }

    /// Users of one type, without sensitive columns.
    pub async fn find_by_type(
        &self,
        user_type: UserType,
        options: QueryOptions,
    ) -> StorageResult<Vec<User>> {
        let options = redact(options).where_eq("user_type", json!(user_type.as_str()));
        self.repo.find_all(&options).await
    }

    /// # Errors
    ///
    /// * `ConstraintViolation` - The email is already registered
    pub async fn create(&self, user: &NewUser) -> StorageResult<User> {
        self.repo.create(user).await
    }

    /// Merges `patch` into a stored user.
    pub async fn update(&self, id: &str, patch: &UserPatch) -> StorageResult<User> {
        self.repo.update(id, patch).await
    }

    /// Stamps `last_login_at` with the current time.
    pub async fn record_login(&self, id: &str) -> StorageResult<User> {
        let mut fields = Record::new();
        fields.insert(
            "last_login_at".to_string(),
            json!(timestamp::format(&Utc::now())),
        );
        self.repo.update_fields(id, fields).await
    }

    /// Activates or deactivates an account.
    pub async fn set_active(&self, id: &str, active: bool) -> StorageResult<User> {
        let patch = UserPatch {
            is_active: Some(active),
            ..Default::default()
        };
        self.repo.update(id, &patch).await
    }

    /// Counts users, optionally filtered by `criteria`.
    pub async fn count(&self, criteria: Option<&Record>) -> StorageResult<u64> {
        self.repo.count(criteria).await
    }
}

/// Removes sensitive columns from the projection.
fn redact(mut options: QueryOptions) -> QueryOptions {
    let columns: Vec<String> = match options.select.take() {
        Some(selected) => selected,
        None => schema::users().columns.into_iter().map(|c| c.name).collect(),
    };
    options.select = Some(
        columns
            .into_iter()
            .filter(|c| !SENSITIVE_COLUMNS.contains(&c.as_str()))
            .collect(),
    );
    options
}
