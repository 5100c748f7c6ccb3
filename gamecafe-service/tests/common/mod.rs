#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use shared::{Error, Requester};
use tower::ServiceExt;
use uuid::Uuid;

use gamecafe_service::api::{create_router, AppState};
use gamecafe_service::catalog::ConsoleCatalog;
use gamecafe_service::gateway::{ChargeHandle, PaymentGateway};
use gamecafe_service::inventory::{KeyAssignor, Shop};
use gamecafe_service::ledger::BookingLedger;
use gamecafe_service::models::{NewConsole, NewProduct};
use gamecafe_service::reconcile::{FailurePolicy, ReconciliationEngine};
use gamecafe_service::store::{InventoryStore, MemoryStore, ResourceStore, Store};
use gamecafe_service::sweeper::ExpirySweeper;

/// Gateway double: hands out sequential checkout references and records
/// every charge; can be switched into an outage to exercise the retryable
/// error path.
pub struct MockGateway {
    counter: AtomicUsize,
    outage: Mutex<Option<String>>,
    pub charges: Mutex<Vec<(String, BigDecimal, String)>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            outage: Mutex::new(None),
            charges: Mutex::new(Vec::new()),
        }
    }

    pub fn set_outage(&self, reason: &str) {
        *self.outage.lock().unwrap() = Some(reason.to_string());
    }

    pub fn clear_outage(&self) {
        *self.outage.lock().unwrap() = None;
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initiate(
        &self,
        phone: &str,
        amount: &BigDecimal,
        account_reference: &str,
    ) -> Result<ChargeHandle, Error> {
        if let Some(reason) = self.outage.lock().unwrap().clone() {
            return Err(Error::Gateway(reason));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.charges.lock().unwrap().push((
            phone.to_string(),
            amount.clone(),
            account_reference.to_string(),
        ));
        Ok(ChargeHandle {
            external_reference: format!("ws_CO_{n:06}"),
            merchant_request_id: format!("29115-{n}"),
            customer_message: "Success. Request accepted for processing".into(),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub ledger: BookingLedger,
    pub engine: ReconciliationEngine,
    pub assignor: KeyAssignor,
    pub sweeper: ExpirySweeper,
}

pub fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let gateway = Arc::new(MockGateway::new());

    let ledger = BookingLedger::new(dyn_store.clone());
    let engine = ReconciliationEngine::new(
        dyn_store.clone(),
        gateway.clone(),
        FailurePolicy { max_attempts: 3 },
    );
    let state = AppState {
        catalog: ConsoleCatalog::new(dyn_store.clone()),
        ledger: ledger.clone(),
        engine: engine.clone(),
        shop: Shop::new(dyn_store.clone()),
    };

    TestApp {
        router: create_router(state),
        store,
        gateway,
        ledger,
        engine,
        assignor: KeyAssignor::new(dyn_store.clone()),
        sweeper: ExpirySweeper::new(dyn_store, 30, 60),
    }
}

pub fn user() -> Requester {
    Requester {
        user_id: Uuid::new_v4(),
        admin: false,
    }
}

pub fn admin() -> Requester {
    Requester {
        user_id: Uuid::new_v4(),
        admin: true,
    }
}

pub async fn seed_console(app: &TestApp, hourly_rate: i64) -> Uuid {
    let id = Uuid::new_v4();
    app.store
        .add_console(NewConsole {
            id,
            name: format!("PS5-{}", &id.to_string()[..8]),
            hourly_rate: BigDecimal::from(hourly_rate),
            status: "available".into(),
        })
        .await
        .unwrap();
    id
}

pub async fn seed_product(app: &TestApp, price: i64, key_codes: &[&str]) -> Uuid {
    let id = Uuid::new_v4();
    app.store
        .add_product(NewProduct {
            id,
            name: format!("game-{}", &id.to_string()[..8]),
            price: BigDecimal::from(price),
        })
        .await
        .unwrap();
    app.store
        .add_game_keys(id, key_codes.iter().map(|k| k.to_string()).collect())
        .await
        .unwrap();
    id
}

pub fn hours_from_now(hours: i64) -> DateTime<Utc> {
    Utc::now() + Duration::hours(hours)
}

pub fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

/// Drives one request through the router and returns the status plus the
/// parsed JSON body (or the raw text for non-JSON responses).
pub async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    requester: Option<Requester>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(requester) = requester {
        builder = builder.header("x-user-id", requester.user_id.to_string());
        if requester.admin {
            builder = builder.header("x-user-role", "admin");
        }
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

pub fn success_callback(reference: &str, receipt: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": reference,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 200.0},
                        {"Name": "MpesaReceiptNumber", "Value": receipt},
                        {"Name": "TransactionDate", "Value": 20250314101530u64},
                        {"Name": "PhoneNumber", "Value": 254712345678u64}
                    ]
                }
            }
        }
    })
}

pub fn failure_callback(reference: &str, desc: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": reference,
                "ResultCode": 1032,
                "ResultDesc": desc
            }
        }
    })
}

pub fn uuid_from(body: &Value, field: &str) -> Uuid {
    Uuid::parse_str(body[field].as_str().unwrap()).unwrap()
}
