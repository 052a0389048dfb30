//! Database backend implementations.
//!
//! Each backend implements the provider contract in [`crate::core`] and is
//! gated behind a feature flag. All three are enabled by default.
//!
//! # Available Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | SQLite | `sqlite` | Embedded database, file-based or in-memory |
//! | PostgreSQL | `postgres` | Pooled connections to a PostgreSQL server |
//! | Supabase | `supabase` | PostgREST API with Realtime change feeds |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use flock_persistence::backends::sqlite::SqliteProvider;
//!
//! # #[cfg(feature = "sqlite")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // In-memory database, connected and ready
//! let provider = SqliteProvider::in_memory().await?;
//!
//! // Or a file-based database
//! let provider = SqliteProvider::open("./data/flock.db").await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "supabase")]
pub mod supabase;
