//! # Stockguard Runtime
//!
//! Lock-guarded stock reservation on top of the storage traits in
//! `stockguard-core`.
//!
//! ## Core Components
//!
//! - **`LeaseLock`**: named, reentrant, lease-bounded lock over a `LockBackend`
//! - **`ReservationCoordinator`**: lock, decrement, confirm, release, with
//!   compensation when the order cannot be confirmed
//! - **Retry**: exponential backoff with jitter, shared by lock polling and
//!   store writes
//! - **Metrics**: Prometheus recorders for all of the above
//!
//! ## Example
//!
//! ```ignore
//! use stockguard_runtime::{LeaseLock, ReservationCoordinator, ReservationRequest};
//! use stockguard_core::types::Requester;
//! use std::sync::Arc;
//!
//! let lock = Arc::new(LeaseLock::new(Arc::new(lock_backend)));
//! let coordinator = ReservationCoordinator::new(lock, Arc::new(ledger), Arc::new(orders));
//!
//! let receipt = coordinator
//!     .reserve(ReservationRequest::new("42", Requester::new("alice")))
//!     .await?;
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub mod coordinator;
pub mod lease_lock;

pub use coordinator::{
    ReservationCoordinator, ReservationReceipt, ReservationRequest, ReservationSettings,
    ReservationState,
};
pub use lease_lock::{AcquireError, LeaseLock, LeaseLockConfig};
pub use retry::{RetryPolicy, retry_with_predicate};
