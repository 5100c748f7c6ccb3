pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{BookingStatus, ConsoleStatus, Error, OrderStatus};
use uuid::Uuid;

use crate::models::*;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[async_trait]
pub trait ResourceStore {
    async fn get_console(&self, id: Uuid) -> Result<Option<Console>, Error>;
    async fn list_available_consoles(&self) -> Result<Vec<Console>, Error>;
    async fn add_console(&self, console: NewConsole) -> Result<Console, Error>;
    /// Returns false when the console does not exist.
    async fn set_console_status(&self, id: Uuid, status: ConsoleStatus) -> Result<bool, Error>;
}

#[async_trait]
pub trait BookingStore {
    /// The overlap check and the insert run as one atomic operation scoped
    /// to the console; two racing reservations for overlapping windows can
    /// never both land. Fails with `Conflict` when a live booking overlaps.
    async fn try_insert_if_no_overlap(&self, booking: NewBooking) -> Result<Booking, Error>;
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, Error>;
    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>, Error>;
    async fn all_bookings(&self) -> Result<Vec<Booking>, Error>;
    /// Conditional transition: succeeds (true) iff the current status is one
    /// of `from`. The timestamp column matching `to` is stamped with `at`.
    async fn compare_and_set_booking_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, Error>;
    async fn cancel_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, Error>;
    async fn complete_elapsed_confirmed(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, Error>;
}

#[async_trait]
pub trait PaymentStore {
    /// Create the payment for a booking/order, or supersede the existing
    /// non-completed one in place (fresh reference, amount and phone; status
    /// back to pending). A completed payment is never superseded; that is a
    /// `Conflict`. Keeps the one-payment-per-target invariant.
    async fn put_pending_payment(&self, payment: NewPayment) -> Result<Payment, Error>;
    async fn payment_by_external_ref(&self, external_ref: &str) -> Result<Option<Payment>, Error>;
    async fn payment_for_booking(&self, booking_id: Uuid) -> Result<Option<Payment>, Error>;
    async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>, Error>;
    async fn payments_for_user(&self, user_id: Uuid) -> Result<Vec<Payment>, Error>;
    /// Conditional pending -> completed. False means the payment had already
    /// reached a terminal state (duplicate delivery).
    async fn complete_payment(
        &self,
        id: Uuid,
        provider_txn_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, Error>;
    /// Conditional pending -> failed; increments and returns the failure
    /// count. None means the payment had already reached a terminal state.
    async fn fail_payment(&self, id: Uuid, reason: &str) -> Result<Option<i32>, Error>;
}

#[async_trait]
pub trait OrderStore {
    async fn insert_order(&self, order: NewOrder, lines: Vec<OrderLine>) -> Result<Order, Error>;
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, Error>;
    async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>, Error>;
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, Error>;
    async fn compare_and_set_order_status(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, Error>;
    async fn record_fulfillment_error(&self, id: Uuid, message: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait InventoryStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, Error>;
    async fn add_product(&self, product: NewProduct) -> Result<Product, Error>;
    async fn add_game_keys(&self, product_id: Uuid, codes: Vec<String>) -> Result<(), Error>;
    /// Atomically claim one unused key for the product, marking it used for
    /// `user_id`/`order_line_id`. Ok(None) means the pool is exhausted. Two
    /// concurrent claims never receive the same key.
    async fn claim_game_key(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        order_line_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<GameKey>, Error>;
    async fn keys_for_order(&self, order_id: Uuid) -> Result<Vec<GameKey>, Error>;
    async fn unused_key_count(&self, product_id: Uuid) -> Result<i64, Error>;
}

pub trait Store:
    ResourceStore + BookingStore + PaymentStore + OrderStore + InventoryStore + Send + Sync
{
}

impl<T> Store for T where
    T: ResourceStore + BookingStore + PaymentStore + OrderStore + InventoryStore + Send + Sync
{
}
