use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{BookingStatus, ConsoleStatus, OrderStatus, PaymentStatus, PaymentTarget, TimeWindow};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::consoles)]
pub struct Console {
    pub id: Uuid,
    pub name: String,
    pub hourly_rate: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Console {
    pub fn status(&self) -> ConsoleStatus {
        ConsoleStatus::parse(&self.status).unwrap_or(ConsoleStatus::Maintenance)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::consoles)]
pub struct NewConsole {
    pub id: Uuid,
    pub name: String,
    pub hourly_rate: BigDecimal,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::bookings)]
pub struct Booking {
    pub id: Uuid,
    pub console_id: Uuid,
    pub user_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_hours: i32,
    pub amount: BigDecimal,
    pub contact_name: String,
    pub contact_phone: String,
    pub contact_email: String,
    pub notes: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Unknown status strings are treated as dead (non-live) bookings.
    pub fn status(&self) -> BookingStatus {
        BookingStatus::parse(&self.status).unwrap_or(BookingStatus::Cancelled)
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct NewBooking {
    pub id: Uuid,
    pub console_id: Uuid,
    pub user_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_hours: i32,
    pub amount: BigDecimal,
    pub contact_name: String,
    pub contact_phone: String,
    pub contact_email: String,
    pub notes: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::payments)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub phone_number: String,
    pub external_reference: Option<String>,
    pub provider_txn_id: Option<String>,
    pub status: String,
    pub failed_attempts: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::parse(&self.status).unwrap_or(PaymentStatus::Failed)
    }

    pub fn target(&self) -> Option<PaymentTarget> {
        self.booking_id
            .map(PaymentTarget::Booking)
            .or(self.order_id.map(PaymentTarget::Order))
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct NewPayment {
    pub id: Uuid,
    pub booking_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub phone_number: String,
    pub external_reference: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::products)]
pub struct NewProduct {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::game_keys)]
pub struct GameKey {
    pub id: Uuid,
    pub product_id: Uuid,
    pub key_code: String,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by: Option<Uuid>,
    pub order_line_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::game_keys)]
pub struct NewGameKey {
    pub id: Uuid,
    pub product_id: Uuid,
    pub key_code: String,
    pub is_used: bool,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub status: String,
    pub fulfillment_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn status(&self) -> OrderStatus {
        OrderStatus::parse(&self.status).unwrap_or(OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::order_lines)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}
