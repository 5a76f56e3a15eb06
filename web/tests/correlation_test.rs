//! Correlation IDs reach the reservation logs of the order endpoint.
//!
//! Kept in its own test binary: it installs a thread-local subscriber.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use std::fmt;
use std::sync::{Arc, Mutex};
use stockguard_runtime::{LeaseLock, ReservationCoordinator};
use stockguard_testing::{InMemoryLockBackend, InMemoryOrderLog, InMemoryStockLedger, ManualClock};
use stockguard_web::{AppState, CORRELATION_ID_HEADER, SUCCESS_BODY, router};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use uuid::Uuid;

/// Correlation id recorded on an `http_request` span.
struct RequestCorrelation(String);

#[derive(Default)]
struct CorrelationVisitor(Option<String>);

impl Visit for CorrelationVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "correlation_id" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

/// For every runtime event, the correlation id of the enclosing request
/// span, if there is one.
#[derive(Clone, Default)]
struct RuntimeEvents(Arc<Mutex<Vec<(String, Option<String>)>>>);

impl<S> Layer<S> for RuntimeEvents
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != "http_request" {
            return;
        }
        let mut visitor = CorrelationVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(value), Some(span)) = (visitor.0, ctx.span(id)) {
            span.extensions_mut().insert(RequestCorrelation(value));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if !target.starts_with("stockguard_runtime") {
            return;
        }
        let correlation = ctx.event_scope(event).and_then(|scope| {
            scope
                .into_iter()
                .find_map(|span| span.extensions().get::<RequestCorrelation>().map(|c| c.0.clone()))
        });
        self.0.lock().unwrap().push((target.to_string(), correlation));
    }
}

#[tokio::test]
async fn reservation_logs_carry_the_request_correlation_id() {
    let events = RuntimeEvents::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

    let clock = ManualClock::starting_at_test_epoch();
    let backend = Arc::new(InMemoryLockBackend::new(clock.shared()));
    let ledger = Arc::new(InMemoryStockLedger::new(clock.shared()).with_stock("42", 1));
    let orders = Arc::new(InMemoryOrderLog::new(clock.shared()));
    let lock = Arc::new(LeaseLock::with_clock(backend, clock.shared()));
    let coordinator = ReservationCoordinator::new(lock, ledger, orders).with_clock(clock.shared());
    let server = TestServer::new(router(AppState::new(Arc::new(coordinator)))).unwrap();

    let correlation_id = Uuid::new_v4();
    let response = server
        .post("/goods/order/42")
        .add_header(
            HeaderName::from_static(CORRELATION_ID_HEADER),
            HeaderValue::from_str(&correlation_id.to_string()).unwrap(),
        )
        .await;
    assert_eq!(response.text(), SUCCESS_BODY);

    let events = events.0.lock().unwrap();
    assert!(
        events.iter().any(|(target, _)| target.ends_with("lease_lock")),
        "lock events missing: {events:?}"
    );
    assert!(
        events.iter().any(|(target, _)| target.ends_with("coordinator")),
        "coordinator events missing: {events:?}"
    );
    let expected = correlation_id.to_string();
    for (target, correlation) in events.iter() {
        assert_eq!(
            correlation.as_deref(),
            Some(expected.as_str()),
            "{target} event logged outside the request span"
        );
    }
}
