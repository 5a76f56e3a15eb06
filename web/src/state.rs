//! Application state for Axum handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use stockguard_core::ledger::StockLedger;
use stockguard_core::lock::LockBackend;
use stockguard_core::order_log::OrderLog;
use stockguard_runtime::ReservationCoordinator;

/// State shared by all handlers.
///
/// Generic over the three stores so the same router serves production
/// (Redis + `PostgreSQL`) and tests (in-memory stores).
pub struct AppState<L, S, O>
where
    L: LockBackend,
    S: StockLedger,
    O: OrderLog,
{
    /// Runs reservations; also exposes the stores for queries and readiness.
    pub coordinator: Arc<ReservationCoordinator<L, S, O>>,
    /// Renders `/metrics`; `None` when no exporter is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl<L, S, O> AppState<L, S, O>
where
    L: LockBackend,
    S: StockLedger,
    O: OrderLog,
{
    /// Create state without a metrics exporter.
    #[must_use]
    pub const fn new(coordinator: Arc<ReservationCoordinator<L, S, O>>) -> Self {
        Self {
            coordinator,
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

// Manual impl: the stores themselves need not be `Clone`.
impl<L, S, O> Clone for AppState<L, S, O>
where
    L: LockBackend,
    S: StockLedger,
    O: OrderLog,
{
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            metrics: self.metrics.clone(),
        }
    }
}
