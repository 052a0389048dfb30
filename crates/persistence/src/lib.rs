//! Flock Persistence Layer
//!
//! Storage for the drone-show platform: one provider contract, three
//! interchangeable backends chosen by configuration at startup, and typed
//! repositories that never learn which backend is active.
//!
//! # Features
//!
//! - **Provider Contract**: CRUD, criteria and range queries, transactions and
//!   bulk operations behind [`DatabaseProvider`](core::DatabaseProvider)
//! - **Pluggable Backends**: SQLite, PostgreSQL and Supabase (PostgREST)
//! - **Guarded Initialization**: concurrent callers share one connection
//!   attempt through [`InitializationGuard`](guard::InitializationGuard)
//! - **Health Reporting**: latency-graded health checks and pool statistics
//! - **Change Feeds**: table subscriptions on providers with realtime support
//!
//! # Backend Features
//!
//! Enable backends with feature flags in `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! flock-persistence = { version = "0.1", default-features = false, features = ["sqlite"] }
//! ```
//!
//! - `sqlite` (default) - SQLite file or in-memory database through r2d2
//! - `postgres` (default) - PostgreSQL through deadpool-postgres
//! - `supabase` (default) - Supabase REST and Realtime APIs
//!
//! # Architecture
//!
//! - [`config`] - Provider selection and pool settings from the environment
//! - [`error`] - Error taxonomy shared by every backend
//! - [`types`] - Records, query options and table definitions
//! - [`core`] - The provider contract and realtime extension
//! - [`backends`] - Backend implementations
//! - [`factory`] - Provider construction, lifecycle and health
//! - [`guard`] - Idempotent, concurrency-safe initialization
//! - [`models`] - Entity shapes
//! - [`repository`] - Typed repositories per entity
//! - [`schema`] - Table definitions and bootstrap
//! - [`analytics`] - Dashboard aggregations
//!
//! # Quick Start
//!
//! ```no_run
//! use flock_persistence::config::DatabaseConfig;
//! use flock_persistence::guard::InitializationGuard;
//! use flock_persistence::models::{NewUser, UserType};
//! use flock_persistence::repository::Repositories;
//!
//! # async fn run() -> flock_persistence::StorageResult<()> {
//! let guard = InitializationGuard::with_config(DatabaseConfig::sqlite(":memory:"));
//! let provider = guard.ensure_connection().await?;
//! flock_persistence::schema::ensure_schema(provider.as_ref()).await?;
//!
//! let repos = Repositories::new(provider);
//! let user = repos.users.create(&NewUser::new("pilot@example.com", UserType::Operator)).await?;
//! assert!(repos.users.find_by_id(&user.id).await?.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod analytics;
pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod factory;
pub mod guard;
pub mod models;
pub mod repository;
pub mod schema;
pub mod types;

// Re-export commonly used types at crate root
pub use config::DatabaseConfig;
pub use error::{ErrorKind, StorageError, StorageResult};
pub use types::{QueryOptions, Record};

// Re-export core traits
pub use core::{
    DataAccess, DatabaseProvider, ProviderCapability, ProviderExt, ProviderKind,
    ProviderTransaction, RealtimeProvider,
};

// Re-export lifecycle entry points
pub use factory::{DatabaseFactory, HealthReport, HealthStatus, SharedProvider};
pub use guard::{GuardState, InitializationGuard};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
