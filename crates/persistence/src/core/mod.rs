//! Core provider traits and abstractions.
//!
//! This module provides the foundational traits for the persistence layer:
//!
//! - [`DataAccess`] - CRUD and raw query operations
//! - [`DatabaseProvider`] - Lifecycle, capabilities, bulk, transactions, schema
//! - [`ProviderTransaction`] - A transaction pinned to one connection
//! - [`ProviderExt`] - The callback `transaction` runner
//! - [`RealtimeProvider`] - Change subscriptions
//!
//! # Trait Hierarchy
//!
//! ```text
//! DataAccess
//!     ├── ProviderTransaction
//!     └── DatabaseProvider
//!             └── ProviderExt (blanket)
//!
//! RealtimeProvider (reached through DatabaseProvider::as_realtime)
//! ```
//!
//! # Provider Capabilities
//!
//! Not all providers support every operation. Use
//! [`DatabaseProvider::supports`] to discover what a provider offers at
//! runtime:
//!
//! ```ignore
//! use flock_persistence::core::{DatabaseProvider, ProviderCapability};
//!
//! fn check_capabilities(provider: &dyn DatabaseProvider) {
//!     if provider.supports(ProviderCapability::Transactions) {
//!         // Use callback transactions
//!     }
//! }
//! ```

mod provider;
mod realtime;
mod transaction;

pub use provider::{
    DataAccess, DatabaseProvider, PoolStats, ProviderCapability, ProviderKind, ProviderStats,
    ProviderTransaction,
};
pub use realtime::{ChangeCallback, ChangeEvent, ChangeType, RealtimeProvider, Subscription};
pub use transaction::ProviderExt;
