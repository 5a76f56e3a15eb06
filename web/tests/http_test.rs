//! HTTP tests for the Stockguard router, run against in-memory stores.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestResponse, TestServer};
use std::sync::Arc;
use std::time::Duration;
use stockguard_core::order_log::OrderLog;
use stockguard_core::types::{CallChain, OrderId, OrderRecord, OrderStatus, StockRecord};
use stockguard_runtime::{LeaseLock, ReservationCoordinator, ReservationSettings, RetryPolicy};
use stockguard_testing::{InMemoryLockBackend, InMemoryOrderLog, InMemoryStockLedger, ManualClock};
use stockguard_web::{
    AppState, CORRELATION_ID_HEADER, FAILURE_BODY, ORDER_ID_HEADER, OUTCOME_HEADER, SUCCESS_BODY,
    router,
};
use uuid::Uuid;

type Coordinator =
    ReservationCoordinator<InMemoryLockBackend, InMemoryStockLedger, InMemoryOrderLog>;

struct Harness {
    server: TestServer,
    backend: Arc<InMemoryLockBackend>,
    ledger: Arc<InMemoryStockLedger>,
    orders: Arc<InMemoryOrderLog>,
    coordinator: Arc<Coordinator>,
}

fn harness(stock: i64) -> Harness {
    let clock = ManualClock::starting_at_test_epoch();
    let backend = Arc::new(InMemoryLockBackend::new(clock.shared()));
    let ledger = Arc::new(InMemoryStockLedger::new(clock.shared()).with_stock("42", stock));
    let orders = Arc::new(InMemoryOrderLog::new(clock.shared()));
    let lock = Arc::new(LeaseLock::with_clock(Arc::clone(&backend), clock.shared()));
    let coordinator = Arc::new(
        ReservationCoordinator::new(lock, Arc::clone(&ledger), Arc::clone(&orders))
            .with_clock(clock.shared())
            .with_settings(ReservationSettings {
                wait_timeout: Duration::from_millis(50),
                lease_duration: Duration::from_secs(25),
                status_write_retry: RetryPolicy::builder().max_retries(0).build(),
            }),
    );

    let server = TestServer::new(router(AppState::new(Arc::clone(&coordinator)))).unwrap();

    Harness {
        server,
        backend,
        ledger,
        orders,
        coordinator,
    }
}

fn header_name(name: &str) -> HeaderName {
    HeaderName::from_bytes(name.as_bytes()).unwrap()
}

fn header(response: &TestResponse, name: &str) -> String {
    response
        .header(header_name(name))
        .to_str()
        .unwrap()
        .to_string()
}

fn order_id_of(response: &TestResponse) -> OrderId {
    OrderId::from_uuid(Uuid::parse_str(&header(response, ORDER_ID_HEADER)).unwrap())
}

// ============================================================================
// POST /goods/order/:goods_id
// ============================================================================

#[tokio::test]
async fn test_order_accepted() {
    let h = harness(2);

    let response = h.server.post("/goods/order/42").await;

    response.assert_status_ok();
    assert_eq!(response.text(), SUCCESS_BODY);
    assert_eq!(header(&response, OUTCOME_HEADER), "accepted");

    let order = h.orders.get(order_id_of(&response)).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.requester.as_str(), "anonymous");
}

#[tokio::test]
async fn test_out_of_stock_is_business_failure() {
    let h = harness(0);

    let response = h.server.post("/goods/order/42").await;

    response.assert_status_ok();
    assert_eq!(response.text(), FAILURE_BODY);
    assert_eq!(header(&response, OUTCOME_HEADER), "rejected-business");
}

#[tokio::test]
async fn test_unknown_goods_is_business_failure() {
    let h = harness(5);

    let response = h.server.post("/goods/order/404").await;

    assert_eq!(response.text(), FAILURE_BODY);
    assert_eq!(header(&response, OUTCOME_HEADER), "rejected-business");
}

#[tokio::test]
async fn test_stock_sells_out_across_requests() {
    let h = harness(3);

    let mut bodies = Vec::new();
    for _ in 0..5 {
        bodies.push(h.server.post("/goods/order/42").await.text());
    }

    assert_eq!(bodies.iter().filter(|b| *b == SUCCESS_BODY).count(), 3);
    assert_eq!(bodies.iter().filter(|b| *b == FAILURE_BODY).count(), 2);
    assert_eq!(h.orders.count_with_status(OrderStatus::Confirmed), 3);
    assert!(h.backend.is_empty());
}

#[tokio::test]
async fn test_lock_contention_is_system_failure() {
    let h = harness(5);
    let token = h
        .coordinator
        .lease_lock()
        .try_acquire("42", &CallChain::new(), Duration::ZERO, Duration::from_secs(25))
        .await
        .unwrap();

    let response = h.server.post("/goods/order/42").await;

    assert_eq!(response.text(), FAILURE_BODY);
    assert_eq!(header(&response, OUTCOME_HEADER), "rejected-system");
    h.coordinator.lease_lock().release(&token).await;
}

#[tokio::test]
async fn test_store_outage_is_system_failure() {
    let h = harness(5);
    h.orders.set_unavailable(true);

    let response = h.server.post("/goods/order/42").await;

    response.assert_status_ok();
    assert_eq!(response.text(), FAILURE_BODY);
    assert_eq!(header(&response, OUTCOME_HEADER), "rejected-system");
}

#[tokio::test]
async fn test_idempotency_key_replays_outcome() {
    let h = harness(5);
    let key = Uuid::new_v4();
    let send = || {
        h.server
            .post("/goods/order/42")
            .add_header(
                HeaderName::from_static("idempotency-key"),
                HeaderValue::from_str(&key.to_string()).unwrap(),
            )
            .add_header(
                HeaderName::from_static("x-requester"),
                HeaderValue::from_static("alice"),
            )
    };

    let first = send().await;
    let second = send().await;

    assert_eq!(first.text(), SUCCESS_BODY);
    assert_eq!(second.text(), SUCCESS_BODY);
    assert_eq!(order_id_of(&first), OrderId::from_uuid(key));
    assert_eq!(order_id_of(&second), OrderId::from_uuid(key));

    let stock: StockRecord = h.server.get("/goods/42/stock").await.json();
    assert_eq!(stock.quantity, 4);

    let order: OrderRecord = h.server.get(&format!("/orders/{key}")).await.json();
    assert_eq!(order.requester.as_str(), "alice");
}

#[tokio::test]
async fn test_malformed_idempotency_key_rejected() {
    let h = harness(5);

    let response = h
        .server
        .post("/goods/order/42")
        .add_header(
            HeaderName::from_static("idempotency-key"),
            HeaderValue::from_static("order-1"),
        )
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
    assert_eq!(h.ledger.restores(), 0);
    assert!(h.orders.records().is_empty());
}

#[tokio::test]
async fn test_correlation_id_echoed() {
    let h = harness(5);
    let correlation_id = Uuid::new_v4();

    let response = h
        .server
        .post("/goods/order/42")
        .add_header(
            header_name(CORRELATION_ID_HEADER),
            HeaderValue::from_str(&correlation_id.to_string()).unwrap(),
        )
        .await;

    assert_eq!(
        header(&response, CORRELATION_ID_HEADER),
        correlation_id.to_string()
    );
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_stock_level() {
    let h = harness(7);

    let response = h.server.get("/goods/42/stock").await;
    response.assert_status_ok();
    let stock: StockRecord = response.json();
    assert_eq!(stock.quantity, 7);
    assert_eq!(stock.item_id.as_str(), "42");

    h.server
        .get("/goods/404/stock")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ledger_outage_on_stock_query() {
    let h = harness(7);
    h.ledger.set_unavailable(true);

    h.server
        .get("/goods/42/stock")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_order_lookup() {
    let h = harness(0);
    let response = h.server.post("/goods/order/42").await;
    let order_id = order_id_of(&response);

    let order: OrderRecord = h.server.get(&format!("/orders/{order_id}")).await.json();
    assert_eq!(order.status, OrderStatus::Failed);

    h.server
        .get(&format!("/orders/{}", Uuid::new_v4()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    h.server
        .get("/orders/not-a-uuid")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_and_readiness() {
    let h = harness(1);

    let health = h.server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.text(), "ok");

    let ready = h.server.get("/ready").await;
    ready.assert_status_ok();
    let body: serde_json::Value = ready.json();
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_readiness_reports_failed_store() {
    let h = harness(1);
    h.backend.set_unavailable(true);

    let ready = h.server.get("/ready").await;

    ready.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = ready.json();
    assert_eq!(body["status"], "unavailable");
    assert_eq!(body["checks"][0]["component"], "lock_store");
    assert_eq!(body["checks"][0]["healthy"], false);
    assert_eq!(body["checks"][1]["healthy"], true);
}

#[tokio::test]
async fn test_metrics_without_exporter() {
    let h = harness(1);

    h.server
        .get("/metrics")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
