use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{ConsoleStatus, Error, Requester};
use tracing::{error, warn};
use uuid::Uuid;

use crate::catalog::ConsoleCatalog;
use crate::gateway;
use crate::inventory::{OrderItem, Shop};
use crate::ledger::{BookingLedger, ReserveRequest};
use crate::models::{Booking, Console, GameKey, Order, OrderLine, Payment};
use crate::reconcile::ReconciliationEngine;

#[derive(Clone)]
pub struct AppState {
    pub catalog: ConsoleCatalog,
    pub ledger: BookingLedger,
    pub engine: ReconciliationEngine,
    pub shop: Shop,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/consoles", get(list_consoles))
        .route("/consoles/:id", get(get_console))
        .route("/consoles/:id/status", put(set_console_status))
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/cancel", put(cancel_booking))
        .route("/bookings/:id/complete", put(complete_booking))
        .route("/payments/initiate", post(initiate_payment))
        .route("/payments/callback", post(payment_callback))
        .route("/payments/status/:booking_id", get(payment_status))
        .route("/payments", get(list_payments))
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "missing or invalid identity".into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) | Error::InvalidTransition { .. } | Error::MalformedCallback(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) | Error::UnknownReference(_) => StatusCode::NOT_FOUND,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Conflict(_) | Error::OutOfStock(_) => StatusCode::CONFLICT,
            Error::Gateway(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("storage error: {:#}", err);
            Self {
                status,
                message: "internal error".into(),
            }
        } else {
            Self {
                status,
                message: err.to_string(),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

/// Caller identity asserted by the upstream auth layer as trusted headers.
pub struct Identity(pub Requester);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(ApiError::unauthorized)?;
        let admin = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .map(|role| role == "admin")
            .unwrap_or(false);
        Ok(Identity(Requester { user_id, admin }))
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn list_consoles(State(state): State<AppState>) -> Result<Json<Vec<Console>>, ApiError> {
    let consoles = state.catalog.list_available().await?;
    Ok(Json(consoles))
}

pub async fn get_console(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Console>, ApiError> {
    let console = state.catalog.get(id).await?;
    Ok(Json(console))
}

#[derive(Debug, Deserialize)]
pub struct SetConsoleStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub async fn set_console_status(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Path(id): Path<Uuid>,
    Json(request): Json<SetConsoleStatusRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let status = ConsoleStatus::parse(&request.status)
        .ok_or_else(|| Error::Validation(format!("unknown console status '{}'", request.status)))?;
    state.catalog.set_status(requester, id, status).await?;
    Ok(Json(MessageResponse {
        message: "Console status updated".into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub console_id: Option<String>,
    pub start_time: Option<String>,
    pub duration: Option<i32>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    pub id: Uuid,
    pub message: String,
}

pub async fn create_booking(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<CreateBookingResponse>), ApiError> {
    let (console_id, start_time, duration) =
        match (request.console_id, request.start_time, request.duration) {
            (Some(console_id), Some(start_time), Some(duration)) => {
                (console_id, start_time, duration)
            }
            _ => return Err(Error::Validation("missing required fields".into()).into()),
        };
    let console_id = Uuid::parse_str(&console_id)
        .map_err(|_| Error::Validation("invalid console id".into()))?;
    let start_time = DateTime::parse_from_rfc3339(&start_time)
        .map_err(|_| Error::Validation("invalid start time format".into()))?
        .with_timezone(&Utc);

    let booking = state
        .ledger
        .reserve(
            requester,
            ReserveRequest {
                console_id,
                start_time,
                duration_hours: duration,
                contact_name: request.name,
                contact_phone: request.phone,
                contact_email: request.email,
                notes: request.notes,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            id: booking.id,
            message: "Booking created successfully".into(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BookingListQuery {
    #[serde(default)]
    pub all: bool,
}

pub async fn list_bookings(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Query(query): Query<BookingListQuery>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let bookings = if query.all {
        state.ledger.all_bookings(requester).await?
    } else {
        state.ledger.bookings_for(requester).await?
    };
    Ok(Json(bookings))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, ApiError> {
    let booking = state.ledger.booking_for(requester, id).await?;
    Ok(Json(booking))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.ledger.cancel(requester, id).await?;
    Ok(Json(MessageResponse {
        message: "Booking cancelled successfully".into(),
    }))
}

pub async fn complete_booking(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.ledger.complete(requester, id).await?;
    Ok(Json(MessageResponse {
        message: "Booking completed".into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub booking_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub external_reference: String,
    pub customer_message: String,
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), ApiError> {
    let initiated = match (request.booking_id, request.order_id) {
        (Some(booking_id), None) => {
            state
                .engine
                .initiate_booking_payment(requester, booking_id, &request.phone_number)
                .await?
        }
        (None, Some(order_id)) => {
            state
                .engine
                .initiate_order_payment(requester, order_id, &request.phone_number)
                .await?
        }
        _ => {
            return Err(Error::Validation(
                "exactly one of booking_id or order_id is required".into(),
            )
            .into())
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(InitiatePaymentResponse {
            payment_id: initiated.payment.id,
            external_reference: initiated.external_reference,
            customer_message: initiated.customer_message,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

/// Provider webhook. Structurally valid deliveries are acknowledged with a
/// 200 whatever reconciliation decides, so the provider does not storm us
/// with retries; an unknown reference is the one 404 the provider can act
/// on, and malformed envelopes are 400.
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let event = match gateway::parse_callback(&payload) {
        Ok(event) => event,
        Err(err) => {
            warn!("rejected malformed payment callback: {}", err);
            return ApiError::from(err).into_response();
        }
    };

    match state.engine.handle(event).await {
        Ok(()) => Json(CallbackAck {
            result_code: 0,
            result_desc: "Accepted".into(),
        })
        .into_response(),
        Err(err @ Error::UnknownReference(_)) => {
            warn!("{}", err);
            ApiError::from(err).into_response()
        }
        Err(err) => {
            error!("payment callback processing failed: {:#}", err);
            ApiError::from(err).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub status: String,
    pub error_message: Option<String>,
}

pub async fn payment_status(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let payment = state.engine.payment_for_booking(requester, booking_id).await?;
    Ok(Json(PaymentStatusResponse {
        status: payment.status,
        error_message: payment.error_message,
    }))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Identity(requester): Identity,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let payments = state.engine.history(requester).await?;
    Ok(Json(payments))
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub external_reference: String,
    pub customer_message: String,
}

pub async fn create_order(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let items = request
        .items
        .into_iter()
        .map(|item| OrderItem {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    let order = state.shop.place_order(requester, items).await?;
    let initiated = state
        .engine
        .initiate_order_payment(requester, order.id, &request.phone_number)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: order.id,
            payment_id: initiated.payment.id,
            external_reference: initiated.external_reference,
            customer_message: initiated.customer_message,
        }),
    ))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Identity(requester): Identity,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state.shop.orders_for(requester).await?;
    Ok(Json(orders))
}

#[derive(Debug, Serialize)]
pub struct OrderDetailResponse {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    pub keys: Vec<GameKey>,
}

pub async fn get_order(
    State(state): State<AppState>,
    Identity(requester): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetailResponse>, ApiError> {
    let (order, lines, keys) = state.shop.order_detail(requester, id).await?;
    Ok(Json(OrderDetailResponse { order, lines, keys }))
}
