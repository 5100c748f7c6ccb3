//! In-memory store for tests and local development. Every operation that
//! participates in an invariant runs to completion under the one store
//! mutex, matching the atomicity the Postgres implementation gets from
//! transactions and conditional updates.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{BookingStatus, ConsoleStatus, Error, OrderStatus, PaymentStatus, TimeWindow};
use uuid::Uuid;

use crate::models::*;
use crate::store::{BookingStore, InventoryStore, OrderStore, PaymentStore, ResourceStore};

#[derive(Default)]
struct Inner {
    consoles: HashMap<Uuid, Console>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, Payment>,
    products: HashMap<Uuid, Product>,
    game_keys: Vec<GameKey>,
    orders: HashMap<Uuid, Order>,
    order_lines: Vec<OrderLine>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn stamp_booking(booking: &mut Booking, to: BookingStatus, at: DateTime<Utc>) {
    booking.status = to.as_str().to_string();
    match to {
        BookingStatus::Confirmed => booking.confirmed_at = Some(at),
        BookingStatus::Cancelled => booking.cancelled_at = Some(at),
        BookingStatus::Completed => booking.completed_at = Some(at),
        BookingStatus::Pending => {}
    }
}

fn stamp_order(order: &mut Order, to: OrderStatus, at: DateTime<Utc>) {
    order.status = to.as_str().to_string();
    match to {
        OrderStatus::Paid => order.paid_at = Some(at),
        OrderStatus::Completed => order.completed_at = Some(at),
        OrderStatus::Cancelled => order.cancelled_at = Some(at),
        OrderStatus::Pending => {}
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_console(&self, id: Uuid) -> Result<Option<Console>, Error> {
        Ok(self.lock().consoles.get(&id).cloned())
    }

    async fn list_available_consoles(&self) -> Result<Vec<Console>, Error> {
        let mut consoles: Vec<Console> = self
            .lock()
            .consoles
            .values()
            .filter(|c| c.status() == ConsoleStatus::Available)
            .cloned()
            .collect();
        consoles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(consoles)
    }

    async fn add_console(&self, console: NewConsole) -> Result<Console, Error> {
        let console = Console {
            id: console.id,
            name: console.name,
            hourly_rate: console.hourly_rate,
            status: console.status,
            created_at: Utc::now(),
        };
        self.lock().consoles.insert(console.id, console.clone());
        Ok(console)
    }

    async fn set_console_status(&self, id: Uuid, status: ConsoleStatus) -> Result<bool, Error> {
        let mut inner = self.lock();
        match inner.consoles.get_mut(&id) {
            Some(console) => {
                console.status = status.as_str().to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn try_insert_if_no_overlap(&self, booking: NewBooking) -> Result<Booking, Error> {
        let mut inner = self.lock();
        let window = TimeWindow {
            start: booking.start_time,
            end: booking.end_time,
        };
        let overlapping = inner.bookings.values().any(|existing| {
            existing.console_id == booking.console_id
                && existing.status().is_live()
                && existing.window().overlaps(&window)
        });
        if overlapping {
            return Err(Error::Conflict(
                "console is already booked for this time slot".into(),
            ));
        }
        let booking = Booking {
            id: booking.id,
            console_id: booking.console_id,
            user_id: booking.user_id,
            start_time: booking.start_time,
            end_time: booking.end_time,
            duration_hours: booking.duration_hours,
            amount: booking.amount,
            contact_name: booking.contact_name,
            contact_phone: booking.contact_phone,
            contact_email: booking.contact_email,
            notes: booking.notes,
            status: booking.status,
            created_at: Utc::now(),
            confirmed_at: None,
            cancelled_at: None,
            completed_at: None,
        };
        inner.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, Error> {
        Ok(self.lock().bookings.get(&id).cloned())
    }

    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>, Error> {
        let mut bookings: Vec<Booking> = self
            .lock()
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(bookings)
    }

    async fn all_bookings(&self) -> Result<Vec<Booking>, Error> {
        let mut bookings: Vec<Booking> = self.lock().bookings.values().cloned().collect();
        bookings.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(bookings)
    }

    async fn compare_and_set_booking_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut inner = self.lock();
        match inner.bookings.get_mut(&id) {
            Some(booking) if from.contains(&booking.status()) => {
                stamp_booking(booking, to, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, Error> {
        let mut inner = self.lock();
        let mut cancelled = Vec::new();
        for booking in inner.bookings.values_mut() {
            if booking.status() == BookingStatus::Pending && booking.created_at < cutoff {
                stamp_booking(booking, BookingStatus::Cancelled, at);
                cancelled.push(booking.id);
            }
        }
        Ok(cancelled)
    }

    async fn complete_elapsed_confirmed(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, Error> {
        let mut inner = self.lock();
        let mut completed = Vec::new();
        for booking in inner.bookings.values_mut() {
            if booking.status() == BookingStatus::Confirmed && booking.end_time <= now {
                stamp_booking(booking, BookingStatus::Completed, now);
                completed.push(booking.id);
            }
        }
        Ok(completed)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn put_pending_payment(&self, payment: NewPayment) -> Result<Payment, Error> {
        let mut inner = self.lock();
        let existing = inner
            .payments
            .values_mut()
            .find(|p| match (payment.booking_id, payment.order_id) {
                (Some(booking_id), _) => p.booking_id == Some(booking_id),
                (_, Some(order_id)) => p.order_id == Some(order_id),
                _ => false,
            });
        match existing {
            Some(p) if p.status() == PaymentStatus::Completed => Err(Error::Conflict(
                "payment has already been completed".into(),
            )),
            Some(p) => {
                p.amount = payment.amount;
                p.currency = payment.currency;
                p.phone_number = payment.phone_number;
                p.external_reference = payment.external_reference;
                p.provider_txn_id = None;
                p.status = payment.status;
                p.error_message = None;
                p.completed_at = None;
                Ok(p.clone())
            }
            None => {
                if payment.booking_id.is_none() && payment.order_id.is_none() {
                    return Err(Error::Validation(
                        "payment must reference a booking or an order".into(),
                    ));
                }
                let payment = Payment {
                    id: payment.id,
                    booking_id: payment.booking_id,
                    order_id: payment.order_id,
                    user_id: payment.user_id,
                    amount: payment.amount,
                    currency: payment.currency,
                    phone_number: payment.phone_number,
                    external_reference: payment.external_reference,
                    provider_txn_id: None,
                    status: payment.status,
                    failed_attempts: 0,
                    error_message: None,
                    created_at: Utc::now(),
                    completed_at: None,
                };
                inner.payments.insert(payment.id, payment.clone());
                Ok(payment)
            }
        }
    }

    async fn payment_by_external_ref(&self, external_ref: &str) -> Result<Option<Payment>, Error> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.external_reference.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn payment_for_booking(&self, booking_id: Uuid) -> Result<Option<Payment>, Error> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.booking_id == Some(booking_id))
            .cloned())
    }

    async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>, Error> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.order_id == Some(order_id))
            .cloned())
    }

    async fn payments_for_user(&self, user_id: Uuid) -> Result<Vec<Payment>, Error> {
        let mut payments: Vec<Payment> = self
            .lock()
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn complete_payment(
        &self,
        id: Uuid,
        provider_txn_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut inner = self.lock();
        match inner.payments.get_mut(&id) {
            Some(p) if p.status() == PaymentStatus::Pending => {
                p.status = PaymentStatus::Completed.as_str().to_string();
                p.provider_txn_id = provider_txn_id.map(str::to_string);
                p.completed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_payment(&self, id: Uuid, reason: &str) -> Result<Option<i32>, Error> {
        let mut inner = self.lock();
        match inner.payments.get_mut(&id) {
            Some(p) if p.status() == PaymentStatus::Pending => {
                p.status = PaymentStatus::Failed.as_str().to_string();
                p.error_message = Some(reason.to_string());
                p.failed_attempts += 1;
                Ok(Some(p.failed_attempts))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: NewOrder, lines: Vec<OrderLine>) -> Result<Order, Error> {
        let mut inner = self.lock();
        let order = Order {
            id: order.id,
            user_id: order.user_id,
            amount: order.amount,
            status: order.status,
            fulfillment_error: None,
            created_at: Utc::now(),
            paid_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        inner.orders.insert(order.id, order.clone());
        inner.order_lines.extend(lines);
        Ok(order)
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, Error> {
        Ok(self.lock().orders.get(&id).cloned())
    }

    async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>, Error> {
        Ok(self
            .lock()
            .order_lines
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, Error> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn compare_and_set_order_status(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut inner = self.lock();
        match inner.orders.get_mut(&id) {
            Some(order) if from.contains(&order.status()) => {
                stamp_order(order, to, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_fulfillment_error(&self, id: Uuid, message: &str) -> Result<(), Error> {
        let mut inner = self.lock();
        if let Some(order) = inner.orders.get_mut(&id) {
            order.fulfillment_error = Some(message.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, Error> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn add_product(&self, product: NewProduct) -> Result<Product, Error> {
        let product = Product {
            id: product.id,
            name: product.name,
            price: product.price,
            created_at: Utc::now(),
        };
        self.lock().products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn add_game_keys(&self, product_id: Uuid, codes: Vec<String>) -> Result<(), Error> {
        let mut inner = self.lock();
        for code in codes {
            inner.game_keys.push(GameKey {
                id: Uuid::new_v4(),
                product_id,
                key_code: code,
                is_used: false,
                used_at: None,
                used_by: None,
                order_line_id: None,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn claim_game_key(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        order_line_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<GameKey>, Error> {
        let mut inner = self.lock();
        let key = inner
            .game_keys
            .iter_mut()
            .find(|k| k.product_id == product_id && !k.is_used);
        match key {
            Some(key) => {
                key.is_used = true;
                key.used_at = Some(at);
                key.used_by = Some(user_id);
                key.order_line_id = Some(order_line_id);
                Ok(Some(key.clone()))
            }
            None => Ok(None),
        }
    }

    async fn keys_for_order(&self, order_id: Uuid) -> Result<Vec<GameKey>, Error> {
        let inner = self.lock();
        let line_ids: Vec<Uuid> = inner
            .order_lines
            .iter()
            .filter(|l| l.order_id == order_id)
            .map(|l| l.id)
            .collect();
        Ok(inner
            .game_keys
            .iter()
            .filter(|k| k.order_line_id.map(|id| line_ids.contains(&id)).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn unused_key_count(&self, product_id: Uuid) -> Result<i64, Error> {
        Ok(self
            .lock()
            .game_keys
            .iter()
            .filter(|k| k.product_id == product_id && !k.is_used)
            .count() as i64)
    }
}
