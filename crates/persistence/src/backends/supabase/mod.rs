//! Supabase backend implementation.
//!
//! Rows are read and written through PostgREST (`<url>/rest/v1/<table>`)
//! with the project's API key; the service role key is used when it is
//! configured. Change feeds come from Supabase Realtime.
//!
//! # Query Mapping
//!
//! | Option | PostgREST |
//! |--------|-----------|
//! | `where` | `col=eq.value`, `col=is.null` |
//! | `conditions` | `col=gt.value`, `col=lte.value`, ... |
//! | `order_by` | `order=a.asc,b.desc` |
//! | `select` | `select=a,b` |
//! | `limit` / `offset` | `limit=n` / `offset=n` |
//!
//! Counts use `HEAD` with `Prefer: count=exact` and read the total from
//! `Content-Range`.
//!
//! # Limitations
//!
//! - No transactions and no raw SQL.
//! - `has_table` is the only schema operation; tables are managed in the
//!   Supabase project.
//! - `bulk_update` is not atomic.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use flock_persistence::backends::supabase::SupabaseProvider;
//! use flock_persistence::config::{PoolConfig, SupabaseConfig};
//! use flock_persistence::core::DatabaseProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = SupabaseProvider::new(
//!     SupabaseConfig::new("https://abc.supabase.co", "anon-key"),
//!     PoolConfig::default(),
//!     Duration::from_secs(5),
//! );
//! provider.connect().await?;
//!
//! if let Some(realtime) = provider.as_realtime() {
//!     let subscription = realtime
//!         .subscribe("bookings", Arc::new(|event| println!("{:?}", event.change_type)))
//!         .await?;
//!     subscription.unsubscribe();
//! }
//! # Ok(())
//! # }
//! ```

mod backend;
mod realtime;
mod rest;

pub use backend::SupabaseProvider;
