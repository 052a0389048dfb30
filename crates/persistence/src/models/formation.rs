// Entity fields mirror their column names.
#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{entity, timestamp};

/// A drone choreography in the library.
///
/// `downloads` and `rating` are counters maintained separately from the
/// content fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub drone_count: i64,
    /// Seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Where the formation was imported from.
    #[serde(default)]
    pub source: Option<String>,
    /// Identifier in the source catalog.
    #[serde(default)]
    pub source_id: Option<String>,
    /// Geometry and metadata.
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub downloads: i64,
    #[serde(default)]
    pub rating: f64,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

entity!(Formation, "formations");

/// Input for a new formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFormation {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub drone_count: i64,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub is_public: bool,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub downloads: i64,
    pub rating: f64,
}

impl NewFormation {
    /// A private formation with no counters.
    pub fn new(name: impl Into<String>, drone_count: i64, duration: f64) -> Self {
        Self {
            name: name.into(),
            description: None,
            category: None,
            drone_count,
            duration,
            price: None,
            is_public: false,
            tags: Vec::new(),
            source: None,
            source_id: None,
            data: Value::Object(Default::default()),
            created_by: None,
            downloads: 0,
            rating: 0.0,
        }
    }

    /// Sets the category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Marks the formation as listed publicly.
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    /// Records provenance.
    pub fn source(mut self, source: impl Into<String>, source_id: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self.source_id = Some(source_id.into());
        self
    }

    /// Sets the creator.
    pub fn created_by(mut self, user_id: impl Into<String>) -> Self {
        self.created_by = Some(user_id.into());
        self
    }
}

/// Content fields to change on a formation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drone_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
