//! Bookings.

use serde_json::json;

use crate::error::StorageResult;
use crate::factory::SharedProvider;
use crate::models::{Booking, BookingPatch, BookingStatus, NewBooking};
use crate::types::{QueryOptions, Record};

use super::base::{Repository, invariant};

#[derive(Debug, Clone)]
pub struct BookingRepository {
    repo: Repository<Booking>,
}

impl BookingRepository {
    /// Creates a repository over `provider`.
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            repo: Repository::new(provider),
        }
    }

    /// The untyped table binding.
    pub fn raw(&self) -> &Repository<Booking> {
        &self.repo
    }

    /// Looks up a booking by id.
    pub async fn find_by_id(&self, id: &str) -> StorageResult<Option<Booking>> {
        self.repo.find_by_id(id).await
    }

    /// Bookings shaped by `options`.
    pub async fn find_all(&self, options: &QueryOptions) -> StorageResult<Vec<Booking>> {
        self.repo.find_all(options).await
    }

    /// Inserts a booking. The provider assigns id and timestamps.
    pub async fn create(&self, booking: &NewBooking) -> StorageResult<Booking> {
        self.repo.create(booking).await
    }

    /// Merges `patch` into a stored booking.
    pub async fn update(&self, id: &str, patch: &BookingPatch) -> StorageResult<Booking> {
        self.repo.update(id, patch).await
    }

    /// Deletes a booking. Returns false if it was already gone.
    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        self.repo.delete(id).await
    }

    /// Counts bookings, optionally filtered by `criteria`.
    pub async fn count(&self, criteria: Option<&Record>) -> StorageResult<u64> {
        self.repo.count(criteria).await
    }

    /// Bookings placed by a user.
    pub async fn find_by_user(
        &self,
        user_id: &str,
        options: QueryOptions,
    ) -> StorageResult<Vec<Booking>> {
        self.repo
            .find_all(&options.where_eq("user_id", json!(user_id)))
            .await
    }

    /// Bookings in one status.
    pub async fn find_by_status(
        &self,
        status: BookingStatus,
        options: QueryOptions,
    ) -> StorageResult<Vec<Booking>> {
        self.repo
            .find_all(&options.where_eq("status", json!(status.as_str())))
            .await
    }

    /// Moves a booking to `status`.
    pub async fn update_status(&self, id: &str, status: BookingStatus) -> StorageResult<Booking> {
        let patch = BookingPatch {
            status: Some(status),
            ..Default::default()
        };
        self.repo.update(id, &patch).await
    }

    /// Records a price and moves the booking to `quoted`.
    pub async fn quote(&self, id: &str, price: f64) -> StorageResult<Booking> {
        if !price.is_finite() || price < 0.0 {
            return Err(invariant(
                self.repo.table(),
                format!("quoted price {} must be a non-negative amount", price),
            ));
        }
        let patch = BookingPatch {
            status: Some(BookingStatus::Quoted),
            quoted_price: Some(price),
            ..Default::default()
        };
        self.repo.update(id, &patch).await
    }
}
