//! Postgres store. Invariant-bearing mutations are expressed as single
//! conditional statements or short transactions: the reservation insert
//! holds a per-console advisory lock for its overlap check, status
//! transitions are conditional updates on the current status, and key
//! claims lock one unused row with `FOR UPDATE SKIP LOCKED`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{BookingStatus, ConsoleStatus, Error, OrderStatus, PaymentStatus, LIVE_BOOKING_STATUSES};
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;
use crate::store::{BookingStore, InventoryStore, OrderStore, PaymentStore, ResourceStore};

type DbPool = Pool<AsyncPgConnection>;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, Error> {
        self.pool.get().await.map_err(Error::storage)
    }
}

fn live_statuses() -> [&'static str; 2] {
    LIVE_BOOKING_STATUSES.map(|s| s.as_str())
}

#[async_trait]
impl ResourceStore for PgStore {
    async fn get_console(&self, id: Uuid) -> Result<Option<Console>, Error> {
        let mut conn = self.conn().await?;
        let console = consoles::table
            .filter(consoles::id.eq(id))
            .first::<Console>(&mut conn)
            .await
            .optional()?;
        Ok(console)
    }

    async fn list_available_consoles(&self) -> Result<Vec<Console>, Error> {
        let mut conn = self.conn().await?;
        let consoles = consoles::table
            .filter(consoles::status.eq(ConsoleStatus::Available.as_str()))
            .order(consoles::name.asc())
            .load::<Console>(&mut conn)
            .await?;
        Ok(consoles)
    }

    async fn add_console(&self, console: NewConsole) -> Result<Console, Error> {
        let mut conn = self.conn().await?;
        let console = diesel::insert_into(consoles::table)
            .values(&console)
            .get_result::<Console>(&mut conn)
            .await?;
        Ok(console)
    }

    async fn set_console_status(&self, id: Uuid, status: ConsoleStatus) -> Result<bool, Error> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(consoles::table.filter(consoles::id.eq(id)))
            .set(consoles::status.eq(status.as_str()))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn try_insert_if_no_overlap(&self, booking: NewBooking) -> Result<Booking, Error> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, Error, _>(|conn| {
            Box::pin(async move {
                // Serializes reservations per console so the overlap check
                // and the insert cannot interleave with a racing request.
                diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
                    .bind::<diesel::sql_types::Text, _>(booking.console_id.to_string())
                    .execute(conn)
                    .await?;

                let overlapping: i64 = bookings::table
                    .filter(bookings::console_id.eq(booking.console_id))
                    .filter(bookings::status.eq_any(live_statuses()))
                    .filter(bookings::start_time.lt(booking.end_time))
                    .filter(bookings::end_time.gt(booking.start_time))
                    .count()
                    .get_result(conn)
                    .await?;

                if overlapping > 0 {
                    return Err(Error::Conflict(
                        "console is already booked for this time slot".into(),
                    ));
                }

                let inserted = diesel::insert_into(bookings::table)
                    .values(&booking)
                    .get_result::<Booking>(conn)
                    .await?;
                Ok(inserted)
            })
        })
        .await
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, Error> {
        let mut conn = self.conn().await?;
        let booking = bookings::table
            .filter(bookings::id.eq(id))
            .first::<Booking>(&mut conn)
            .await
            .optional()?;
        Ok(booking)
    }

    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>, Error> {
        let mut conn = self.conn().await?;
        let bookings = bookings::table
            .filter(bookings::user_id.eq(user_id))
            .order(bookings::start_time.desc())
            .load::<Booking>(&mut conn)
            .await?;
        Ok(bookings)
    }

    async fn all_bookings(&self) -> Result<Vec<Booking>, Error> {
        let mut conn = self.conn().await?;
        let bookings = bookings::table
            .order(bookings::start_time.desc())
            .load::<Booking>(&mut conn)
            .await?;
        Ok(bookings)
    }

    async fn compare_and_set_booking_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut conn = self.conn().await?;
        let from_statuses: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let target = diesel::update(
            bookings::table
                .filter(bookings::id.eq(id))
                .filter(bookings::status.eq_any(from_statuses)),
        );
        let updated = match to {
            BookingStatus::Confirmed => {
                target
                    .set((bookings::status.eq(to.as_str()), bookings::confirmed_at.eq(at)))
                    .execute(&mut conn)
                    .await?
            }
            BookingStatus::Cancelled => {
                target
                    .set((bookings::status.eq(to.as_str()), bookings::cancelled_at.eq(at)))
                    .execute(&mut conn)
                    .await?
            }
            BookingStatus::Completed => {
                target
                    .set((bookings::status.eq(to.as_str()), bookings::completed_at.eq(at)))
                    .execute(&mut conn)
                    .await?
            }
            BookingStatus::Pending => {
                target
                    .set(bookings::status.eq(to.as_str()))
                    .execute(&mut conn)
                    .await?
            }
        };
        Ok(updated > 0)
    }

    async fn cancel_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, Error> {
        let mut conn = self.conn().await?;
        let cancelled = diesel::update(
            bookings::table
                .filter(bookings::status.eq(BookingStatus::Pending.as_str()))
                .filter(bookings::created_at.lt(cutoff)),
        )
        .set((
            bookings::status.eq(BookingStatus::Cancelled.as_str()),
            bookings::cancelled_at.eq(at),
        ))
        .returning(bookings::id)
        .get_results::<Uuid>(&mut conn)
        .await?;
        Ok(cancelled)
    }

    async fn complete_elapsed_confirmed(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, Error> {
        let mut conn = self.conn().await?;
        let completed = diesel::update(
            bookings::table
                .filter(bookings::status.eq(BookingStatus::Confirmed.as_str()))
                .filter(bookings::end_time.le(now)),
        )
        .set((
            bookings::status.eq(BookingStatus::Completed.as_str()),
            bookings::completed_at.eq(now),
        ))
        .returning(bookings::id)
        .get_results::<Uuid>(&mut conn)
        .await?;
        Ok(completed)
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn put_pending_payment(&self, payment: NewPayment) -> Result<Payment, Error> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, Error, _>(|conn| {
            Box::pin(async move {
                let existing = match (payment.booking_id, payment.order_id) {
                    (Some(booking_id), _) => {
                        payments::table
                            .filter(payments::booking_id.eq(booking_id))
                            .for_update()
                            .first::<Payment>(conn)
                            .await
                            .optional()?
                    }
                    (_, Some(order_id)) => {
                        payments::table
                            .filter(payments::order_id.eq(order_id))
                            .for_update()
                            .first::<Payment>(conn)
                            .await
                            .optional()?
                    }
                    _ => {
                        return Err(Error::Validation(
                            "payment must reference a booking or an order".into(),
                        ))
                    }
                };

                match existing {
                    Some(p) if p.status() == PaymentStatus::Completed => Err(Error::Conflict(
                        "payment has already been completed".into(),
                    )),
                    Some(p) => {
                        let superseded = diesel::update(
                            payments::table.filter(payments::id.eq(p.id)),
                        )
                        .set((
                            payments::amount.eq(payment.amount.clone()),
                            payments::currency.eq(payment.currency.clone()),
                            payments::phone_number.eq(payment.phone_number.clone()),
                            payments::external_reference.eq(payment.external_reference.clone()),
                            payments::provider_txn_id.eq(None::<String>),
                            payments::status.eq(payment.status.clone()),
                            payments::error_message.eq(None::<String>),
                            payments::completed_at.eq(None::<DateTime<Utc>>),
                        ))
                        .get_result::<Payment>(conn)
                        .await?;
                        Ok(superseded)
                    }
                    None => {
                        // The partial unique index on the target column turns
                        // a racing double-insert into a conflict.
                        diesel::insert_into(payments::table)
                            .values(&payment)
                            .get_result::<Payment>(conn)
                            .await
                            .map_err(|e| match e {
                                DieselError::DatabaseError(
                                    DatabaseErrorKind::UniqueViolation,
                                    _,
                                ) => Error::Conflict(
                                    "a payment for this target already exists".into(),
                                ),
                                other => other.into(),
                            })
                    }
                }
            })
        })
        .await
    }

    async fn payment_by_external_ref(&self, external_ref: &str) -> Result<Option<Payment>, Error> {
        let mut conn = self.conn().await?;
        let payment = payments::table
            .filter(payments::external_reference.eq(external_ref))
            .first::<Payment>(&mut conn)
            .await
            .optional()?;
        Ok(payment)
    }

    async fn payment_for_booking(&self, booking_id: Uuid) -> Result<Option<Payment>, Error> {
        let mut conn = self.conn().await?;
        let payment = payments::table
            .filter(payments::booking_id.eq(booking_id))
            .first::<Payment>(&mut conn)
            .await
            .optional()?;
        Ok(payment)
    }

    async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>, Error> {
        let mut conn = self.conn().await?;
        let payment = payments::table
            .filter(payments::order_id.eq(order_id))
            .first::<Payment>(&mut conn)
            .await
            .optional()?;
        Ok(payment)
    }

    async fn payments_for_user(&self, user_id: Uuid) -> Result<Vec<Payment>, Error> {
        let mut conn = self.conn().await?;
        let payments = payments::table
            .filter(payments::user_id.eq(user_id))
            .order(payments::created_at.desc())
            .load::<Payment>(&mut conn)
            .await?;
        Ok(payments)
    }

    async fn complete_payment(
        &self,
        id: Uuid,
        provider_txn_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            payments::table
                .filter(payments::id.eq(id))
                .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
        )
        .set((
            payments::status.eq(PaymentStatus::Completed.as_str()),
            payments::provider_txn_id.eq(provider_txn_id),
            payments::completed_at.eq(at),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    async fn fail_payment(&self, id: Uuid, reason: &str) -> Result<Option<i32>, Error> {
        let mut conn = self.conn().await?;
        let attempts = diesel::update(
            payments::table
                .filter(payments::id.eq(id))
                .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
        )
        .set((
            payments::status.eq(PaymentStatus::Failed.as_str()),
            payments::error_message.eq(reason),
            payments::failed_attempts.eq(payments::failed_attempts + 1),
        ))
        .returning(payments::failed_attempts)
        .get_result::<i32>(&mut conn)
        .await
        .optional()?;
        Ok(attempts)
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: NewOrder, lines: Vec<OrderLine>) -> Result<Order, Error> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, Error, _>(|conn| {
            Box::pin(async move {
                let inserted = diesel::insert_into(orders::table)
                    .values(&order)
                    .get_result::<Order>(conn)
                    .await?;

                diesel::insert_into(order_lines::table)
                    .values(&lines)
                    .execute(conn)
                    .await?;

                Ok(inserted)
            })
        })
        .await
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, Error> {
        let mut conn = self.conn().await?;
        let order = orders::table
            .filter(orders::id.eq(id))
            .first::<Order>(&mut conn)
            .await
            .optional()?;
        Ok(order)
    }

    async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>, Error> {
        let mut conn = self.conn().await?;
        let lines = order_lines::table
            .filter(order_lines::order_id.eq(order_id))
            .load::<OrderLine>(&mut conn)
            .await?;
        Ok(lines)
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, Error> {
        let mut conn = self.conn().await?;
        let orders = orders::table
            .filter(orders::user_id.eq(user_id))
            .order(orders::created_at.desc())
            .load::<Order>(&mut conn)
            .await?;
        Ok(orders)
    }

    async fn compare_and_set_order_status(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut conn = self.conn().await?;
        let from_statuses: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let target = diesel::update(
            orders::table
                .filter(orders::id.eq(id))
                .filter(orders::status.eq_any(from_statuses)),
        );
        let updated = match to {
            OrderStatus::Paid => {
                target
                    .set((orders::status.eq(to.as_str()), orders::paid_at.eq(at)))
                    .execute(&mut conn)
                    .await?
            }
            OrderStatus::Completed => {
                target
                    .set((orders::status.eq(to.as_str()), orders::completed_at.eq(at)))
                    .execute(&mut conn)
                    .await?
            }
            OrderStatus::Cancelled => {
                target
                    .set((orders::status.eq(to.as_str()), orders::cancelled_at.eq(at)))
                    .execute(&mut conn)
                    .await?
            }
            OrderStatus::Pending => {
                target
                    .set(orders::status.eq(to.as_str()))
                    .execute(&mut conn)
                    .await?
            }
        };
        Ok(updated > 0)
    }

    async fn record_fulfillment_error(&self, id: Uuid, message: &str) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        diesel::update(orders::table.filter(orders::id.eq(id)))
            .set(orders::fulfillment_error.eq(message))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, Error> {
        let mut conn = self.conn().await?;
        let product = products::table
            .filter(products::id.eq(id))
            .first::<Product>(&mut conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn add_product(&self, product: NewProduct) -> Result<Product, Error> {
        let mut conn = self.conn().await?;
        let product = diesel::insert_into(products::table)
            .values(&product)
            .get_result::<Product>(&mut conn)
            .await?;
        Ok(product)
    }

    async fn add_game_keys(&self, product_id: Uuid, codes: Vec<String>) -> Result<(), Error> {
        let mut conn = self.conn().await?;
        let keys: Vec<NewGameKey> = codes
            .into_iter()
            .map(|code| NewGameKey {
                id: Uuid::new_v4(),
                product_id,
                key_code: code,
                is_used: false,
            })
            .collect();
        diesel::insert_into(game_keys::table)
            .values(&keys)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn claim_game_key(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        order_line_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<GameKey>, Error> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, Error, _>(|conn| {
            Box::pin(async move {
                // SKIP LOCKED keeps concurrent claims from queueing on the
                // same row; each claimant locks a distinct unused key.
                let key = game_keys::table
                    .filter(game_keys::product_id.eq(product_id))
                    .filter(game_keys::is_used.eq(false))
                    .order(game_keys::created_at.asc())
                    .limit(1)
                    .for_update()
                    .skip_locked()
                    .first::<GameKey>(conn)
                    .await
                    .optional()?;

                match key {
                    Some(key) => {
                        let claimed = diesel::update(
                            game_keys::table.filter(game_keys::id.eq(key.id)),
                        )
                        .set((
                            game_keys::is_used.eq(true),
                            game_keys::used_at.eq(at),
                            game_keys::used_by.eq(user_id),
                            game_keys::order_line_id.eq(order_line_id),
                        ))
                        .get_result::<GameKey>(conn)
                        .await?;
                        Ok(Some(claimed))
                    }
                    None => Ok(None),
                }
            })
        })
        .await
    }

    async fn keys_for_order(&self, order_id: Uuid) -> Result<Vec<GameKey>, Error> {
        let mut conn = self.conn().await?;
        let keys = game_keys::table
            .inner_join(
                order_lines::table
                    .on(game_keys::order_line_id.eq(order_lines::id.nullable())),
            )
            .filter(order_lines::order_id.eq(order_id))
            .select(game_keys::all_columns)
            .load::<GameKey>(&mut conn)
            .await?;
        Ok(keys)
    }

    async fn unused_key_count(&self, product_id: Uuid) -> Result<i64, Error> {
        let mut conn = self.conn().await?;
        let count = game_keys::table
            .filter(game_keys::product_id.eq(product_id))
            .filter(game_keys::is_used.eq(false))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }
}
