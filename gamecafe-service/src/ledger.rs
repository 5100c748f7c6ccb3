//! Booking ledger: the authoritative record of reservations and their
//! lifecycle. Overlap-freedom is enforced by the store's atomic
//! check-and-insert; every status transition is a conditional update, so a
//! cancel racing a confirm resolves to exactly one winner.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use shared::{BookingStatus, ConsoleStatus, Error, Requester, TimeWindow};
use tracing::info;
use uuid::Uuid;

use crate::models::{Booking, NewBooking};
use crate::store::Store;

pub struct ReserveRequest {
    pub console_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_hours: i32,
    pub contact_name: String,
    pub contact_phone: String,
    pub contact_email: String,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct BookingLedger {
    store: Arc<dyn Store>,
}

impl BookingLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn reserve(
        &self,
        requester: Requester,
        request: ReserveRequest,
    ) -> Result<Booking, Error> {
        let console = self
            .store
            .get_console(request.console_id)
            .await?
            .ok_or(Error::NotFound("console"))?;

        if console.status() == ConsoleStatus::Maintenance {
            return Err(Error::Conflict("console is under maintenance".into()));
        }

        if request.start_time < Utc::now() {
            return Err(Error::Validation("cannot book in the past".into()));
        }

        let window = TimeWindow::from_start_and_hours(request.start_time, request.duration_hours)?;
        let amount = console.hourly_rate.clone() * BigDecimal::from(request.duration_hours);

        let booking = self
            .store
            .try_insert_if_no_overlap(NewBooking {
                id: Uuid::new_v4(),
                console_id: console.id,
                user_id: requester.user_id,
                start_time: window.start,
                end_time: window.end,
                duration_hours: request.duration_hours,
                amount,
                contact_name: request.contact_name,
                contact_phone: request.contact_phone,
                contact_email: request.contact_email,
                notes: request.notes,
                status: BookingStatus::Pending.as_str().to_string(),
            })
            .await?;

        info!(
            "booking {} created for console {} ({} - {})",
            booking.id, booking.console_id, booking.start_time, booking.end_time
        );
        Ok(booking)
    }

    pub async fn cancel(&self, requester: Requester, id: Uuid) -> Result<(), Error> {
        let booking = self
            .store
            .get_booking(id)
            .await?
            .ok_or(Error::NotFound("booking"))?;

        if !requester.may_act_for(booking.user_id) {
            return Err(Error::Forbidden);
        }

        let cancelled = self
            .store
            .compare_and_set_booking_status(
                id,
                &[BookingStatus::Pending, BookingStatus::Confirmed],
                BookingStatus::Cancelled,
                Utc::now(),
            )
            .await?;
        if !cancelled {
            return Err(self.transition_rejected(id).await?);
        }

        info!("booking {} cancelled by {}", id, requester.user_id);
        Ok(())
    }

    /// Confirmation is driven by payment reconciliation, never by a direct
    /// client request. Returns false when the booking was not pending.
    pub async fn confirm(&self, id: Uuid) -> Result<bool, Error> {
        let confirmed = self
            .store
            .compare_and_set_booking_status(
                id,
                &[BookingStatus::Pending],
                BookingStatus::Confirmed,
                Utc::now(),
            )
            .await?;
        if confirmed {
            info!("booking {} confirmed", id);
        }
        Ok(confirmed)
    }

    pub async fn complete(&self, requester: Requester, id: Uuid) -> Result<(), Error> {
        if !requester.admin {
            return Err(Error::Forbidden);
        }
        if self.store.get_booking(id).await?.is_none() {
            return Err(Error::NotFound("booking"));
        }

        let completed = self
            .store
            .compare_and_set_booking_status(
                id,
                &[BookingStatus::Confirmed],
                BookingStatus::Completed,
                Utc::now(),
            )
            .await?;
        if !completed {
            return Err(self.transition_rejected(id).await?);
        }

        info!("booking {} completed", id);
        Ok(())
    }

    pub async fn booking_for(&self, requester: Requester, id: Uuid) -> Result<Booking, Error> {
        let booking = self
            .store
            .get_booking(id)
            .await?
            .ok_or(Error::NotFound("booking"))?;
        if !requester.may_act_for(booking.user_id) {
            return Err(Error::Forbidden);
        }
        Ok(booking)
    }

    pub async fn bookings_for(&self, requester: Requester) -> Result<Vec<Booking>, Error> {
        self.store.bookings_for_user(requester.user_id).await
    }

    pub async fn all_bookings(&self, requester: Requester) -> Result<Vec<Booking>, Error> {
        if !requester.admin {
            return Err(Error::Forbidden);
        }
        self.store.all_bookings().await
    }

    /// Re-reads the booking a failed conditional transition saw, so the
    /// error names the state that rejected it.
    async fn transition_rejected(&self, id: Uuid) -> Result<Error, Error> {
        let status = self
            .store
            .get_booking(id)
            .await?
            .map(|b| b.status)
            .unwrap_or_else(|| "missing".to_string());
        Ok(Error::invalid_transition(status))
    }
}
