//! Order log trait.
//!
//! Append-only record of purchase attempts. The order id is the idempotency
//! key: a second append with the same id fails with
//! [`OrderLogError::DuplicateOrder`] carrying the stored record, and terminal
//! transitions on an already-terminal record change nothing.
//!
//! ```text
//! PENDING ──mark_confirmed──▶ CONFIRMED
//!    │
//!    └──────mark_failed────▶ FAILED
//! ```

use crate::error::OrderLogError;
use crate::types::{FailureReason, OrderId, OrderRecord, OrderStatus};
use std::future::Future;

/// Append-only order ledger.
pub trait OrderLog: Send + Sync {
    /// Store a new PENDING record.
    ///
    /// # Errors
    ///
    /// - [`OrderLogError::DuplicateOrder`] if the id is already used
    /// - [`OrderLogError::Store`] if the store cannot be reached
    fn append_pending(
        &self,
        order: &OrderRecord,
    ) -> impl Future<Output = Result<(), OrderLogError>> + Send;

    /// Move a PENDING record to CONFIRMED.
    ///
    /// Returns the status the record has afterwards; for an already-terminal
    /// record that is its existing status.
    ///
    /// # Errors
    ///
    /// - [`OrderLogError::NotFound`] if no record exists
    /// - [`OrderLogError::Store`] if the store cannot be reached
    fn mark_confirmed(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<OrderStatus, OrderLogError>> + Send;

    /// Move a PENDING record to FAILED with `reason`.
    ///
    /// Returns the status the record has afterwards; for an already-terminal
    /// record that is its existing status.
    ///
    /// # Errors
    ///
    /// - [`OrderLogError::NotFound`] if no record exists
    /// - [`OrderLogError::Store`] if the store cannot be reached
    fn mark_failed(
        &self,
        order_id: OrderId,
        reason: FailureReason,
    ) -> impl Future<Output = Result<OrderStatus, OrderLogError>> + Send;

    /// Look up a record.
    ///
    /// # Errors
    ///
    /// Returns [`OrderLogError::Store`] if the store cannot be reached.
    fn get(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<OrderRecord>, OrderLogError>> + Send;

    /// Check connectivity.
    ///
    /// # Errors
    ///
    /// Returns [`OrderLogError::Store`] if the store cannot be reached.
    fn ping(&self) -> impl Future<Output = Result<(), OrderLogError>> + Send;
}
