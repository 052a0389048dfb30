// Entity fields mirror their column names.
#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{entity, timestamp};

/// Show lifecycle. Transitions are not enforced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowStatus {
    #[default]
    Draft,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl ShowStatus {
    /// Stored value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShowStatus::Draft => "draft",
            ShowStatus::Scheduled => "scheduled",
            ShowStatus::InProgress => "in_progress",
            ShowStatus::Completed => "completed",
            ShowStatus::Cancelled => "cancelled",
        }
    }
}

/// One formation placed on a show's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowSegment {
    pub formation_id: String,
    /// Offset from show start, in seconds.
    #[serde(default)]
    pub start_time: f64,
    /// Seconds.
    #[serde(default)]
    pub duration: f64,
}

/// A scheduled composition of formations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub status: ShowStatus,
    #[serde(default, with = "timestamp::option")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub formations: Vec<ShowSegment>,
    #[serde(default)]
    pub drone_count: i64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub crew: Value,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

entity!(Show, "shows");

/// Input for a new show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewShow {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub status: ShowStatus,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option",
        default
    )]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub formations: Vec<ShowSegment>,
    pub drone_count: i64,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    pub crew: Value,
}

impl NewShow {
    /// An empty draft.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            organization_id: None,
            created_by: None,
            status: ShowStatus::Draft,
            scheduled_at: None,
            location: None,
            formations: Vec::new(),
            drone_count: 0,
            duration: 0.0,
            total_cost: None,
            crew: Value::Array(Vec::new()),
        }
    }

    /// Schedules the show.
    pub fn scheduled(mut self, at: DateTime<Utc>) -> Self {
        self.status = ShowStatus::Scheduled;
        self.scheduled_at = Some(at);
        self
    }

    /// Assigns the owning organization.
    pub fn organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }
}

/// Fields to change on a show.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShowPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ShowStatus>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option",
        default
    )]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formations: Option<Vec<ShowSegment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drone_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crew: Option<Value>,
}
