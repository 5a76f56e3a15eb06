//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for:
//! - Lease lock acquisition, release and lease loss
//! - Reservation outcomes and latency
//! - Stock compensations
//! - Store retries
//!
//! # Example
//!
//! ```rust,no_run
//! use stockguard_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Rendered text is served by the web crate under /metrics
//! let _ = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use stockguard_core::error::Outcome;
use stockguard_core::lock::ReleaseOutcome;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder.
///
/// Installs the global recorder; the handle renders the scrape text.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the scrape endpoint is advertised on (logging only)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this
    /// logs a warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics recorder installed - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "lease_lock_acquisitions_total",
        "Lock acquisition attempts by result (acquired, reentered, timed_out, store_unavailable)"
    );
    describe_histogram!(
        "lease_lock_wait_duration_seconds",
        "Time spent waiting for a lock"
    );
    describe_counter!(
        "lease_lock_release_total",
        "Lock releases by result (decremented, freed, not_held, store_failed)"
    );
    describe_counter!(
        "lease_lock_lease_lost_total",
        "Critical sections that outlived their lease"
    );

    describe_counter!(
        "reservations_total",
        "Finished reservations by outcome (accepted, rejected-business, rejected-system)"
    );
    describe_histogram!(
        "reservation_duration_seconds",
        "End-to-end reservation latency"
    );
    describe_counter!(
        "stock_compensations_total",
        "Units returned to stock after an order could not be confirmed"
    );
    describe_counter!(
        "stock_decrements_total",
        "Conditional stock decrements by result (decremented, exhausted)"
    );

    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "retry_successes_total",
        "Total number of operations that succeeded after retrying"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted max retries"
    );
}

/// Lease lock metrics recorder.
pub struct LeaseLockMetrics;

impl LeaseLockMetrics {
    /// Record the end of an acquisition attempt.
    pub fn record_acquire(result: &'static str, waited: Duration) {
        counter!("lease_lock_acquisitions_total", "result" => result).increment(1);
        histogram!("lease_lock_wait_duration_seconds").record(waited.as_secs_f64());
    }

    /// Record a release.
    pub fn record_release(outcome: ReleaseOutcome) {
        let result = match outcome {
            ReleaseOutcome::Decremented { .. } => "decremented",
            ReleaseOutcome::Freed => "freed",
            ReleaseOutcome::NotHeld => "not_held",
            ReleaseOutcome::StoreFailed => "store_failed",
        };
        counter!("lease_lock_release_total", "result" => result).increment(1);
    }

    /// Record a lease that ran out inside a critical section.
    pub fn record_lease_lost() {
        counter!("lease_lock_lease_lost_total").increment(1);
    }
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a finished reservation.
    pub fn record_outcome(outcome: Outcome, duration: Duration) {
        counter!("reservations_total", "outcome" => outcome.as_str()).increment(1);
        histogram!("reservation_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a unit returned to stock.
    pub fn record_compensation() {
        counter!("stock_compensations_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        LeaseLockMetrics::record_acquire("acquired", Duration::from_millis(3));
        LeaseLockMetrics::record_release(ReleaseOutcome::Freed);
        ReservationMetrics::record_outcome(Outcome::Accepted, Duration::from_millis(12));

        // If another test installed the recorder first, handle is None.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("lease_lock_acquisitions_total"));
            assert!(rendered.contains("lease_lock_release_total"));
            assert!(rendered.contains("reservations_total"));
        }
    }
}
