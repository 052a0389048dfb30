// Entity fields mirror their column names.
#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{entity, timestamp};

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// Books shows.
    #[default]
    Customer,
    /// Flies shows.
    Operator,
    /// Designs formations.
    Artist,
    /// Platform administrator.
    Admin,
}

impl UserType {
    /// Stored value.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Customer => "customer",
            UserType::Operator => "operator",
            UserType::Artist => "artist",
            UserType::Admin => "admin",
        }
    }
}

/// A platform account.
///
/// `password_hash` is `None` when the row was read without sensitive columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub user_type: UserType,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub preferences: Value,
    #[serde(default, with = "timestamp::option")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

entity!(User, "users");

fn active() -> bool {
    true
}

/// Input for a new account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub user_type: UserType,
    pub is_verified: bool,
    pub is_active: bool,
    pub preferences: Value,
}

impl NewUser {
    /// An active, unverified account with empty preferences.
    pub fn new(email: impl Into<String>, user_type: UserType) -> Self {
        Self {
            email: email.into(),
            password_hash: None,
            full_name: None,
            user_type,
            is_verified: false,
            is_active: true,
            preferences: Value::Object(Default::default()),
        }
    }

    /// Sets the credential hash.
    pub fn password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    /// Sets the display name.
    pub fn full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }
}

/// Fields to change on an account. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Value>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option",
        default
    )]
    pub last_login_at: Option<DateTime<Utc>>,
}
