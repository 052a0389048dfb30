//! Entity shapes stored by the domain repositories.
//!
//! Each entity maps to one table and round-trips through a
//! [`Record`](crate::types::Record) with serde. Entities carry the
//! layer-assigned `id`, `created_at` and `updated_at`; the `New*` inputs and
//! `*Patch` updates never do.
//!
//! | Entity | Table |
//! |--------|-------|
//! | [`User`] | `users` |
//! | [`Formation`] | `formations` |
//! | [`Organization`] | `organizations` |
//! | [`Show`] | `shows` |
//! | [`Booking`] | `bookings` |
//! | [`SyncJob`] | `sync_jobs` |
//! | [`AnalyticsEvent`] | `analytics_events` |

use serde::Serialize;
use serde::de::DeserializeOwned;

mod analytics_event;
mod booking;
mod formation;
mod organization;
mod show;
mod sync_job;
pub mod timestamp;
mod user;

pub use analytics_event::{AnalyticsEvent, NewAnalyticsEvent};
pub use booking::{Booking, BookingPatch, BookingStatus, NewBooking};
pub use formation::{Formation, FormationPatch, NewFormation};
pub use organization::{NewOrganization, Organization, OrganizationPatch};
pub use show::{NewShow, Show, ShowPatch, ShowSegment, ShowStatus};
pub use sync_job::{NewSyncJob, SyncJob, SyncProgress, SyncStatus};
pub use user::{NewUser, User, UserPatch, UserType};

/// A typed row bound to one table.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table the entity lives in.
    const TABLE: &'static str;

    /// Layer-assigned identifier.
    fn id(&self) -> &str;
}

macro_rules! entity {
    ($ty:ty, $table:literal) => {
        impl $crate::models::Entity for $ty {
            const TABLE: &'static str = $table;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

pub(crate) use entity;
