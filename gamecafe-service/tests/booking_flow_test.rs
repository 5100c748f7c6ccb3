//! Booking API tests: validation, the interval boundary rules, ownership
//! checks and the admin lifecycle operations.

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::*;
use serde_json::json;
use shared::ConsoleStatus;
use uuid::Uuid;

use gamecafe_service::store::ResourceStore;

fn booking_body(console: Uuid, start: chrono::DateTime<chrono::Utc>, duration: i32) -> serde_json::Value {
    json!({
        "console_id": console.to_string(),
        "start_time": rfc3339(start),
        "duration": duration,
        "name": "Alice",
        "phone": "0712345678",
        "email": "alice@example.com"
    })
}

#[tokio::test]
async fn overlapping_windows_conflict_and_touching_windows_do_not() {
    let app = test_app();
    let console = seed_console(&app, 200).await;
    let t0 = hours_from_now(48);

    let (status, _) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(booking_body(console, t0, 1)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // 10:30-11:30 against a 10:00-11:00 booking
    let (status, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(booking_body(console, t0 + Duration::minutes(30), 1)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "console is already booked for this time slot");

    // 11:00-12:00 touches the boundary, no overlap
    let (status, _) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(booking_body(console, t0 + Duration::hours(1), 1)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn cancelled_bookings_free_the_window() {
    let app = test_app();
    let console = seed_console(&app, 200).await;
    let alice = user();
    let t0 = hours_from_now(48);

    let (status, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(alice),
        Some(booking_body(console, t0, 2)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let booking_id = uuid_from(&body, "id");

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/bookings/{booking_id}/cancel"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(booking_body(console, t0, 2)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn reservation_validation() {
    let app = test_app();
    let console = seed_console(&app, 200).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(json!({"start_time": rfc3339(hours_from_now(24)), "duration": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing required fields");

    let (status, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(json!({
            "console_id": "not-a-uuid",
            "start_time": rfc3339(hours_from_now(24)),
            "duration": 1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid console id");

    let (status, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(json!({
            "console_id": console.to_string(),
            "start_time": "tomorrow at noon",
            "duration": 1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid start time format");

    let (status, _) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(booking_body(Uuid::new_v4(), hours_from_now(24), 1)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(booking_body(console, hours_from_now(-2), 1)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "cannot book in the past");

    let (status, _) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(booking_body(console, hours_from_now(24), 0)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn maintenance_console_rejects_reservations() {
    let app = test_app();
    let console = seed_console(&app, 200).await;
    app.store
        .set_console_status(console, ConsoleStatus::Maintenance)
        .await
        .unwrap();

    let (status, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(user()),
        Some(booking_body(console, hours_from_now(24), 1)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "console is under maintenance");
}

#[tokio::test]
async fn identity_headers_are_required() {
    let app = test_app();
    let console = seed_console(&app, 200).await;

    let (status, _) = send(
        &app.router,
        "POST",
        "/bookings",
        None,
        Some(booking_body(console, hours_from_now(24), 1)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app.router, "GET", "/bookings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cancel_requires_ownership() {
    let app = test_app();
    let console = seed_console(&app, 200).await;
    let alice = user();

    let (_, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(alice),
        Some(booking_body(console, hours_from_now(24), 1)),
    )
    .await;
    let booking_id = uuid_from(&body, "id");

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/bookings/{booking_id}/cancel"),
        Some(user()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // admins may cancel on the owner's behalf
    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/bookings/{booking_id}/cancel"),
        Some(admin()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // a second cancel is an invalid transition
    let (status, body) = send(
        &app.router,
        "PUT",
        &format!("/bookings/{booking_id}/cancel"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid transition from 'cancelled'");

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/bookings/{}/cancel", Uuid::new_v4()),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn complete_is_admin_only_and_requires_confirmed() {
    let app = test_app();
    let console = seed_console(&app, 200).await;
    let alice = user();

    let (_, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(alice),
        Some(booking_body(console, hours_from_now(24), 1)),
    )
    .await;
    let booking_id = uuid_from(&body, "id");

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/bookings/{booking_id}/complete"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // still pending, cannot complete
    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/bookings/{booking_id}/complete"),
        Some(admin()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.ledger.confirm(booking_id).await.unwrap());
    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/bookings/{booking_id}/complete"),
        Some(admin()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &app.router,
        "GET",
        &format!("/bookings/{booking_id}"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn booking_reads_respect_ownership() {
    let app = test_app();
    let console = seed_console(&app, 200).await;
    let alice = user();

    let (_, body) = send(
        &app.router,
        "POST",
        "/bookings",
        Some(alice),
        Some(booking_body(console, hours_from_now(24), 1)),
    )
    .await;
    let booking_id = uuid_from(&body, "id");

    let (status, _) = send(
        &app.router,
        "GET",
        &format!("/bookings/{booking_id}"),
        Some(user()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app.router,
        "GET",
        &format!("/bookings/{booking_id}"),
        Some(alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["amount"], "200");

    // the admin roll-up needs the flag; plain users get their own list
    let (status, body) = send(&app.router, "GET", "/bookings?all=true", Some(admin()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(&app.router, "GET", "/bookings?all=true", Some(user()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app.router, "GET", "/bookings", Some(user()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn console_status_administration() {
    let app = test_app();
    let console = seed_console(&app, 200).await;

    let (status, body) = send(&app.router, "GET", "/consoles", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&app.router, "GET", &format!("/consoles/{console}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "available");

    let (status, _) = send(
        &app.router,
        "GET",
        &format!("/consoles/{}", Uuid::new_v4()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/consoles/{console}/status"),
        Some(user()),
        Some(json!({"status": "maintenance"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/consoles/{console}/status"),
        Some(admin()),
        Some(json!({"status": "broken"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/consoles/{console}/status"),
        Some(admin()),
        Some(json!({"status": "maintenance"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // maintenance consoles drop out of the availability listing
    let (_, body) = send(&app.router, "GET", "/consoles", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 0);

    let (status, _) = send(
        &app.router,
        "PUT",
        &format!("/consoles/{}/status", Uuid::new_v4()),
        Some(admin()),
        Some(json!({"status": "available"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
