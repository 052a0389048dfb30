//! Core types for the persistence layer.
//!
//! This module provides the fundamental types used throughout the persistence layer:
//!
//! - [`Record`] - A row as a JSON object, plus the metadata stamping helpers
//! - [`QueryOptions`], [`OrderBy`], [`Condition`] - Flat query options
//! - [`TableDefinition`], [`ColumnDefinition`] - Schema operation inputs
//!
//! # Examples
//!
//! ## Stamping a New Record
//!
//! ```
//! use flock_persistence::types::{into_record, stamp_new, record_id};
//! use serde_json::json;
//!
//! let data = into_record("formations", json!({
//!     "id": "ignored",
//!     "name": "Heart Burst",
//!     "drone_count": 120
//! })).unwrap();
//!
//! let stamped = stamp_new(data);
//! assert_ne!(record_id(&stamped), Some("ignored"));
//! assert_eq!(stamped["created_at"], stamped["updated_at"]);
//! ```
//!
//! ## Building Query Options
//!
//! ```
//! use flock_persistence::types::{OrderBy, QueryOptions};
//! use serde_json::json;
//!
//! let options = QueryOptions::new()
//!     .where_eq("is_public", json!(true))
//!     .order_by(OrderBy::desc("downloads"))
//!     .order_by(OrderBy::asc("name"))
//!     .limit(20)
//!     .offset(40);
//!
//! assert_eq!(options.order_by.len(), 2);
//! ```

mod query;
mod record;
mod table;

pub use query::{Comparison, Condition, OrderBy, QueryOptions, SortDirection, check_identifier};
pub use record::{
    CREATED_AT_COLUMN, ID_COLUMN, Record, UPDATED_AT_COLUMN, generate_id, into_record, project,
    record_id, stamp_new, stamp_update, timestamp_now,
};
pub use table::{ColumnDefinition, ColumnType, TableDefinition};
