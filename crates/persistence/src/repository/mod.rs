//! Typed repositories over the provider contract.
//!
//! [`Repository`] binds one [`Entity`](crate::models::Entity) table; the
//! per-entity types add the lookups and state changes each table needs.
//! Nothing here knows which backend is active.

// Repository methods are named after the provider operation they wrap.
#![allow(missing_docs)]

mod analytics_events;
mod base;
mod bookings;
mod formations;
mod organizations;
mod shows;
mod sync_jobs;
mod users;

use crate::error::StorageResult;
use crate::factory::SharedProvider;
use crate::guard::InitializationGuard;

pub use analytics_events::AnalyticsEventRepository;
pub use base::{Repository, criteria, from_record, to_record};
pub use bookings::BookingRepository;
pub use formations::{FormationRepository, ImportOutcome};
pub use organizations::OrganizationRepository;
pub use shows::ShowRepository;
pub use sync_jobs::SyncJobRepository;
pub use users::{SENSITIVE_COLUMNS, UserRepository};

/// Every repository over one provider.
#[derive(Debug, Clone)]
pub struct Repositories {
    pub users: UserRepository,
    pub formations: FormationRepository,
    pub organizations: OrganizationRepository,
    pub shows: ShowRepository,
    pub bookings: BookingRepository,
    pub sync_jobs: SyncJobRepository,
    pub analytics_events: AnalyticsEventRepository,
}

impl Repositories {
    /// Creates a repository over `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            users: UserRepository::new(provider.clone()),
            formations: FormationRepository::new(provider.clone()),
            organizations: OrganizationRepository::new(provider.clone()),
            shows: ShowRepository::new(provider.clone()),
            bookings: BookingRepository::new(provider.clone()),
            sync_jobs: SyncJobRepository::new(provider.clone()),
            analytics_events: AnalyticsEventRepository::new(provider),
        }
    }

    /// Waits for `guard` to be ready and binds to its provider.
    pub async fn from_guard(guard: &InitializationGuard) -> StorageResult<Self> {
        Ok(Self::new(guard.ensure_connection().await?))
    }
}
