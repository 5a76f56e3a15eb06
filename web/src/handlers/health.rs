//! Health, readiness and metrics endpoints.
//!
//! Used by load balancers and monitoring systems.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use stockguard_core::ledger::StockLedger;
use stockguard_core::lock::LockBackend;
use stockguard_core::order_log::OrderLog;

/// Liveness. Does NOT check dependencies.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Result of one dependency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyCheck {
    /// Dependency name.
    pub component: &'static str,
    /// `true` if the ping succeeded.
    pub healthy: bool,
    /// Error text when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DependencyCheck {
    fn from_result<E: std::fmt::Display>(component: &'static str, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                component,
                healthy: true,
                message: None,
            },
            Err(e) => {
                tracing::warn!(component, error = %e, "Readiness check failed");
                Self {
                    component,
                    healthy: false,
                    message: Some(e.to_string()),
                }
            }
        }
    }
}

/// Readiness report.
#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    /// `ready` or `unavailable`.
    pub status: &'static str,
    /// One entry per store.
    pub checks: Vec<DependencyCheck>,
}

/// Readiness: pings the lock store, the ledger and the order log.
///
/// # Status Codes
///
/// - 200 OK: every store answered
/// - 503 Service Unavailable: at least one did not
///
/// ```text
/// GET /ready
/// ```
pub async fn readiness<L, S, O>(
    State(state): State<AppState<L, S, O>>,
) -> (StatusCode, Json<Readiness>)
where
    L: LockBackend + 'static,
    S: StockLedger + 'static,
    O: OrderLog + 'static,
{
    let coordinator = &state.coordinator;
    let (lock, ledger, orders) = tokio::join!(
        coordinator.lease_lock().backend().ping(),
        coordinator.ledger().ping(),
        coordinator.orders().ping(),
    );

    let checks = vec![
        DependencyCheck::from_result("lock_store", lock),
        DependencyCheck::from_result("stock_ledger", ledger),
        DependencyCheck::from_result("order_log", orders),
    ];

    if checks.iter().all(|c| c.healthy) {
        (
            StatusCode::OK,
            Json(Readiness {
                status: "ready",
                checks,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Readiness {
                status: "unavailable",
                checks,
            }),
        )
    }
}

/// Prometheus scrape endpoint.
///
/// ```text
/// GET /metrics
/// ```
///
/// 404 when the server runs without an exporter.
#[allow(clippy::unused_async)]
pub async fn render_metrics<L, S, O>(State(state): State<AppState<L, S, O>>) -> Response
where
    L: LockBackend + 'static,
    S: StockLedger + 'static,
    O: OrderLog + 'static,
{
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}
