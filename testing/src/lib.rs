//! # Stockguard Testing
//!
//! Testing utilities for Stockguard.
//!
//! This crate provides:
//! - A controllable clock ([`ManualClock`])
//! - In-memory implementations of every storage trait, with fault injection
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use stockguard_testing::{InMemoryLockBackend, InMemoryOrderLog, InMemoryStockLedger, ManualClock};
//! use stockguard_runtime::{LeaseLock, ReservationCoordinator, ReservationRequest};
//!
//! #[tokio::test]
//! async fn test_single_unit() {
//!     let clock = ManualClock::starting_at_test_epoch();
//!     let lock = LeaseLock::with_clock(Arc::new(InMemoryLockBackend::new(clock.shared())), clock.shared());
//!     let ledger = InMemoryStockLedger::new(clock.shared()).with_stock("42", 1);
//!     let orders = InMemoryOrderLog::new(clock.shared());
//!
//!     let coordinator = ReservationCoordinator::new(Arc::new(lock), Arc::new(ledger), Arc::new(orders));
//!     let receipt = coordinator.reserve(ReservationRequest::new("42", Requester::new("alice"))).await?;
//!     assert_eq!(receipt.remaining_quantity, Some(0));
//! }
//! ```

use chrono::{DateTime, Utc};
use stockguard_core::environment::Clock;

mod lock_backend;
mod order_log;
mod stock_ledger;

pub use lock_backend::InMemoryLockBackend;
pub use order_log::InMemoryOrderLog;
pub use stock_ledger::InMemoryStockLedger;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// 2025-01-01 00:00:00 UTC
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the lock
    /// backend and the lease lock and keep another to advance.
    ///
    /// ```
    /// use stockguard_testing::ManualClock;
    /// use stockguard_core::environment::Clock;
    /// use std::time::Duration;
    ///
    /// let clock = ManualClock::starting_at_test_epoch();
    /// let before = clock.now();
    /// clock.advance(Duration::from_secs(26));
    /// assert_eq!((clock.now() - before).num_seconds(), 26);
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Start at [`test_epoch`].
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_epoch())
        }

        /// Move time forward.
        ///
        /// # Panics
        ///
        /// If `by` does not fit a `chrono::TimeDelta` or the mutex is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap();
            *time += chrono::TimeDelta::from_std(by).unwrap();
        }

        /// Jump to `time`.
        ///
        /// # Panics
        ///
        /// If the mutex is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap() = time;
        }

        /// This clock as a shareable trait object.
        #[must_use]
        pub fn shared(&self) -> Arc<dyn Clock> {
            Arc::new(self.clone())
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "stockguard=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// `(initial quantity, concurrent requests)` for oversell checks.
    ///
    /// Covers the interesting corners: no stock, fewer requests than
    /// stock, and more requests than stock.
    pub fn arb_contention() -> impl Strategy<Value = (i64, usize)> {
        (0i64..8, 1usize..16)
    }
}

// Re-export commonly used items
pub use mocks::{ManualClock, test_epoch};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at_test_epoch();
        let shared = clock.shared();

        clock.advance(Duration::from_millis(1500));

        assert_eq!(shared.now(), test_epoch() + chrono::TimeDelta::milliseconds(1500));
    }
}
