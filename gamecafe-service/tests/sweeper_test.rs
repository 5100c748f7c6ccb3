//! Time-based closure: stale pending bookings are cancelled once their
//! payment window lapses, and confirmed bookings complete when the session
//! ends.

mod common;

use chrono::{Duration, Utc};
use common::*;
use shared::BookingStatus;

use gamecafe_service::ledger::ReserveRequest;
use gamecafe_service::store::BookingStore;

async fn reserve(app: &TestApp, start_hours: i64, duration: i32) -> uuid::Uuid {
    let console = seed_console(app, 200).await;
    app.ledger
        .reserve(
            user(),
            ReserveRequest {
                console_id: console,
                start_time: hours_from_now(start_hours),
                duration_hours: duration,
                contact_name: "Alice".into(),
                contact_phone: "0712345678".into(),
                contact_email: "alice@example.com".into(),
                notes: None,
            },
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn pending_bookings_expire_after_the_payment_window() {
    let app = test_app();
    let booking_id = reserve(&app, 48, 1).await;

    // inside the 30-minute window nothing happens
    app.sweeper.sweep(Utc::now() + Duration::minutes(10)).await.unwrap();
    let booking = app.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status(), BookingStatus::Pending);

    app.sweeper.sweep(Utc::now() + Duration::minutes(31)).await.unwrap();
    let booking = app.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status(), BookingStatus::Cancelled);
    assert!(booking.cancelled_at.is_some());
}

#[tokio::test]
async fn confirmed_bookings_complete_when_the_session_ends() {
    let app = test_app();
    let booking_id = reserve(&app, 1, 1).await;
    assert!(app.ledger.confirm(booking_id).await.unwrap());

    // session still running
    app.sweeper.sweep(Utc::now() + Duration::minutes(90)).await.unwrap();
    let booking = app.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status(), BookingStatus::Confirmed);

    app.sweeper.sweep(Utc::now() + Duration::hours(3)).await.unwrap();
    let booking = app.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status(), BookingStatus::Completed);
    assert!(booking.completed_at.is_some());
}

#[tokio::test]
async fn confirmed_bookings_are_never_expired_by_the_ttl() {
    let app = test_app();
    let booking_id = reserve(&app, 48, 1).await;
    assert!(app.ledger.confirm(booking_id).await.unwrap());

    app.sweeper.sweep(Utc::now() + Duration::hours(2)).await.unwrap();
    let booking = app.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status(), BookingStatus::Confirmed);
}
