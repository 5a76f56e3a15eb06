//! # Stockguard Core
//!
//! Core types and storage traits for lock-guarded stock reservation.
//!
//! A reservation takes one unit of a goods item for one requester. Three
//! external collaborators are involved, each abstracted behind a trait so the
//! runtime can be tested at memory speed and run against real stores in
//! production:
//!
//! - [`lock::LockBackend`]: atomic, lease-bounded, reentrant lock grants
//!   (Redis in production)
//! - [`ledger::StockLedger`]: the authoritative per-item stock counter
//!   (`PostgreSQL` in production)
//! - [`order_log::OrderLog`]: append-only record of purchase attempts
//!   (`PostgreSQL` in production)
//!
//! ```text
//!            ┌────────────────────────┐
//!            │ ReservationCoordinator │   (stockguard-runtime)
//!            └──┬─────────┬─────────┬─┘
//!               ▼         ▼         ▼
//!     ┌───────────┐ ┌───────────┐ ┌──────────┐
//!     │ LeaseLock │ │StockLedger│ │ OrderLog │
//!     └─────┬─────┘ └───────────┘ └──────────┘
//!           ▼
//!     ┌───────────┐
//!     │LockBackend│
//!     └───────────┘
//! ```
//!
//! Nothing in this crate performs I/O.

pub mod error;
pub mod ledger;
pub mod lock;
pub mod order_log;
pub mod types;

pub use error::{LedgerError, OrderLogError, Outcome, ReservationError, StoreError};
pub use ledger::{DecrementOutcome, StockLedger};
pub use lock::{GrantOutcome, LockBackend, ReleaseOutcome};
pub use order_log::OrderLog;
pub use types::{
    CallChain, FailureReason, HolderId, ItemId, LockHandle, LockToken, OrderId, OrderRecord,
    OrderStatus, Requester, StockDecrement, StockRecord,
};

/// Environment module - time abstraction.
///
/// Lease expiry, order timestamps and stock audit entries all read the time
/// through [`Clock`](environment::Clock) so tests can move time explicitly.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use stockguard_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
