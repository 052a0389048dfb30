//! SQLite backend implementation.
//!
//! This module provides a SQLite implementation of the provider contract.
//! It supports both in-memory databases (great for testing) and file-based
//! databases (for development and small deployments).
//!
//! # Features
//!
//! - In-memory and file-based modes
//! - Full CRUD with ordering, projection, pagination and range conditions
//! - Callback transactions on a pinned connection (`BEGIN IMMEDIATE`)
//! - Raw SQL and table DDL
//!
//! # Example
//!
//! ```no_run
//! use flock_persistence::backends::sqlite::SqliteProvider;
//! use flock_persistence::core::DataAccess;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = SqliteProvider::in_memory().await?;
//! let created = provider
//!     .create("formations", json!({"name": "Spiral"}).as_object().unwrap().clone())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Value Mapping
//!
//! | JSON | Stored as | Read back as |
//! |------|-----------|--------------|
//! | bool | INTEGER 0/1 | bool, when the column is declared `BOOLEAN` |
//! | number | INTEGER or REAL | number |
//! | string | TEXT | string |
//! | array/object | TEXT | JSON, when the column is declared `JSON` |
//! | null | NULL | null |
//!
//! Timestamps are fixed-width RFC 3339 text, so range conditions on them
//! compare chronologically.

mod backend;
mod schema;
mod statements;
mod transaction;

pub use backend::SqliteProvider;
pub use transaction::SqliteTransaction;
