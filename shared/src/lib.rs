use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleStatus {
    Available,
    InUse,
    Maintenance,
}

impl ConsoleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleStatus::Available => "available",
            ConsoleStatus::InUse => "in_use",
            ConsoleStatus::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(ConsoleStatus::Available),
            "in_use" => Some(ConsoleStatus::InUse),
            "maintenance" => Some(ConsoleStatus::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

/// Statuses that occupy the console's time window for overlap purposes.
pub const LIVE_BOOKING_STATUSES: [BookingStatus; 2] =
    [BookingStatus::Pending, BookingStatus::Confirmed];

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// A half-open booking interval `[start, end)`. Two windows conflict iff
/// `a.start < b.end && a.end > b.start`, so back-to-back bookings that touch
/// at a boundary do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn from_start_and_hours(start: DateTime<Utc>, hours: i32) -> Result<Self, Error> {
        if hours < 1 {
            return Err(Error::Validation("duration must be at least 1 hour".into()));
        }
        Ok(TimeWindow {
            start,
            end: start + Duration::hours(i64::from(hours)),
        })
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// What a payment pays for. Exactly one payment exists per target at any
/// time; a retried initiation supersedes the previous non-completed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTarget {
    Booking(Uuid),
    Order(Uuid),
}

impl PaymentTarget {
    pub fn id(&self) -> Uuid {
        match self {
            PaymentTarget::Booking(id) | PaymentTarget::Order(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success,
    Failure,
}

/// Provider callback, normalized. Produced by the gateway adapter's parser;
/// consumed exactly once per external reference by the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub external_reference: String,
    pub outcome: PaymentOutcome,
    pub provider_txn_id: Option<String>,
    pub amount: Option<BigDecimal>,
    pub description: String,
}

/// Caller identity as asserted by the upstream (out-of-scope) auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub admin: bool,
}

impl Requester {
    pub fn may_act_for(&self, owner: Uuid) -> bool {
        self.admin || self.user_id == owner
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("not authorized")]
    Forbidden,
    #[error("{0}")]
    Conflict(String),
    #[error("invalid transition from '{from}'")]
    InvalidTransition { from: String },
    #[error("payment gateway unavailable: {0}")]
    Gateway(String),
    #[error("no payment matches reference '{0}'")]
    UnknownReference(String),
    #[error("malformed payment callback: {0}")]
    MalformedCallback(String),
    #[error("product '{0}' is out of stock")]
    OutOfStock(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Storage(anyhow::Error::new(err))
    }

    pub fn invalid_transition(from: impl Into<String>) -> Self {
        Error::InvalidTransition { from: from.into() }
    }
}

impl From<diesel::result::Error> for Error {
    fn from(err: diesel::result::Error) -> Self {
        Error::Storage(err.into())
    }
}
