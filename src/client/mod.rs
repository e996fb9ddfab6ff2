//! Booking operations over the document store: live feeds, conflict-free
//! creation, and owner-only cancellation.

mod error;
mod feed;
mod resolver;

pub use error::BookingError;
pub use feed::{BookingFeed, FeedUpdate};
pub use resolver::{BookingDetails, slot_document_id, validate};
pub(crate) use resolver::validate_date;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::model::*;
use crate::store::Engine;

use error::record_failure;

/// Handle for the presentation layer. Cheap to clone.
#[derive(Clone)]
pub struct BookingClient {
    engine: Arc<Engine>,
    catalog: Arc<Catalog>,
}

impl BookingClient {
    pub fn new(engine: Arc<Engine>, catalog: Arc<Catalog>) -> Self {
        Self { engine, catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Open a live feed of the bookings for one date and room. The first
    /// `next()` yields the current state.
    pub async fn subscribe(&self, date: &str, room: &str) -> BookingFeed {
        debug!("subscribing to {date}/{room}");
        BookingFeed::open(self.engine.clone(), PartitionKey::new(date, room)).await
    }

    /// Book a slot. Fails with `SlotConflict` if anyone already holds the
    /// (date, room, slot) triple, including a booking committed concurrently.
    pub async fn create_booking(&self, details: BookingDetails) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = match validate(&details, &self.catalog) {
            Ok(new) => resolver::claim_slot(&self.engine, new).await,
            Err(e) => Err(e),
        };
        metrics::histogram!(crate::observability::CREATE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1),
            Err(e) => record_failure("create", e),
        }
        result
    }

    /// Cancel a booking. Only its creator may do so; cancelling something
    /// already gone succeeds.
    pub async fn cancel_booking(
        &self,
        booking_id: &str,
        requesting_user_id: &str,
    ) -> Result<(), BookingError> {
        let result = self.cancel_inner(booking_id, requesting_user_id).await;
        if let Err(e) = &result {
            record_failure("cancel", e);
        }
        result
    }

    async fn cancel_inner(&self, booking_id: &str, uid: &str) -> Result<(), BookingError> {
        if booking_id.trim().is_empty() {
            return Err(BookingError::validation("bookingId", "is required"));
        }
        if uid.trim().is_empty() {
            return Err(BookingError::Unauthorized(
                "sign in to cancel a booking".into(),
            ));
        }

        if self.engine.delete_document(booking_id, uid).await? {
            info!("cancelled {booking_id}");
            metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        } else {
            debug!("cancel of {booking_id}: already gone");
        }
        Ok(())
    }

    /// Current bookings for one date and room, without subscribing.
    pub async fn bookings_for(&self, date: &str, room: &str) -> Result<Vec<Booking>, BookingError> {
        Ok(self
            .engine
            .list_bookings(&PartitionKey::new(date, room))
            .await?)
    }
}
