//! Shop orders: pricing from the product table, payment-driven fulfillment
//! and the out-of-stock handling on a paid order.

mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;
use uuid::Uuid;

use gamecafe_service::store::InventoryStore;

#[tokio::test]
async fn paid_order_is_fulfilled_with_distinct_keys() {
    let app = test_app();
    let alice = user();
    let product = seed_product(&app, 1500, &["AAAA-1111", "BBBB-2222", "CCCC-3333"]).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/orders",
        Some(alice),
        Some(json!({
            "items": [{"product_id": product, "quantity": 2}],
            "phone_number": "0712345678"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = uuid_from(&body, "order_id");
    let reference = body["external_reference"].as_str().unwrap().to_string();

    // priced from the product table: 2 x 1500
    assert_eq!(
        app.gateway.charges.lock().unwrap()[0].1,
        bigdecimal::BigDecimal::from(3000)
    );

    let (_, body) = send(&app.router, "GET", &format!("/orders/{order_id}"), Some(alice), None).await;
    assert_eq!(body["order"]["status"], "pending");
    assert_eq!(body["keys"].as_array().unwrap().len(), 0);

    let (status, _) = send(
        &app.router,
        "POST",
        "/payments/callback",
        None,
        Some(success_callback(&reference, "NLJ7RT61SV")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app.router, "GET", &format!("/orders/{order_id}"), Some(alice), None).await;
    assert_eq!(body["order"]["status"], "completed");
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0]["key_code"], keys[1]["key_code"]);
    assert!(keys.iter().all(|k| k["is_used"].as_bool().unwrap()));
}

#[tokio::test]
async fn exhausted_pool_leaves_the_order_paid_with_a_recorded_error() {
    let app = test_app();
    let alice = user();
    let product = seed_product(&app, 1500, &["AAAA-1111"]).await;

    let (_, body) = send(
        &app.router,
        "POST",
        "/orders",
        Some(alice),
        Some(json!({
            "items": [{"product_id": product, "quantity": 2}],
            "phone_number": "0712345678"
        })),
    )
    .await;
    let order_id = uuid_from(&body, "order_id");
    let reference = body["external_reference"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app.router,
        "POST",
        "/payments/callback",
        None,
        Some(success_callback(&reference, "NLJ7RT61SV")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // one key went out, the shortfall is recorded, nothing is silently
    // skipped and the captured funds keep the order in paid
    let (_, body) = send(&app.router, "GET", &format!("/orders/{order_id}"), Some(alice), None).await;
    assert_eq!(body["order"]["status"], "paid");
    assert!(body["order"]["fulfillment_error"]
        .as_str()
        .unwrap()
        .contains("ran out of keys"));
    assert_eq!(body["keys"].as_array().unwrap().len(), 1);
    assert_eq!(app.store.unused_key_count(product).await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_order_callback_does_not_reassign_keys() {
    let app = test_app();
    let alice = user();
    let product = seed_product(&app, 1500, &["AAAA-1111", "BBBB-2222"]).await;

    let (_, body) = send(
        &app.router,
        "POST",
        "/orders",
        Some(alice),
        Some(json!({
            "items": [{"product_id": product, "quantity": 1}],
            "phone_number": "0712345678"
        })),
    )
    .await;
    let order_id = uuid_from(&body, "order_id");
    let reference = body["external_reference"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let (status, _) = send(
            &app.router,
            "POST",
            "/payments/callback",
            None,
            Some(success_callback(&reference, "NLJ7RT61SV")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = send(&app.router, "GET", &format!("/orders/{order_id}"), Some(alice), None).await;
    assert_eq!(body["order"]["status"], "completed");
    assert_eq!(body["keys"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn order_validation_and_ownership() {
    let app = test_app();
    let alice = user();
    let product = seed_product(&app, 1500, &["AAAA-1111"]).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/orders",
        Some(alice),
        Some(json!({"items": [], "phone_number": "0712345678"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "order must contain at least one item");

    let (status, _) = send(
        &app.router,
        "POST",
        "/orders",
        Some(alice),
        Some(json!({
            "items": [{"product_id": Uuid::new_v4(), "quantity": 1}],
            "phone_number": "0712345678"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app.router,
        "POST",
        "/orders",
        Some(alice),
        Some(json!({
            "items": [{"product_id": product, "quantity": 0}],
            "phone_number": "0712345678"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(
        &app.router,
        "POST",
        "/orders",
        Some(alice),
        Some(json!({
            "items": [{"product_id": product, "quantity": 1}],
            "phone_number": "0712345678"
        })),
    )
    .await;
    let order_id = uuid_from(&body, "order_id");

    let (status, _) = send(&app.router, "GET", &format!("/orders/{order_id}"), Some(user()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app.router, "GET", "/orders", Some(alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}
