//! Stock ledger trait.
//!
//! The ledger is the only writer of stock quantities. Its decrement is atomic
//! at the storage layer (a single conditional update) and safe under
//! concurrent access on its own; the reservation lock serializes the
//! higher-level decision to attempt it.

use crate::error::LedgerError;
use crate::types::{ItemId, StockDecrement, StockRecord};
use std::future::Future;

/// Result of [`StockLedger::decrement_if_positive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// One unit was taken.
    Decremented {
        /// Quantity after the decrement
        new_quantity: i64,
        /// Version after the decrement
        version: i64,
    },
    /// Quantity was already zero (or the item is unknown); nothing changed.
    Exhausted,
}

/// Authoritative per-item stock counter.
pub trait StockLedger: Send + Sync {
    /// Current quantity; unknown items read as 0.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the store cannot be reached.
    fn get_quantity(&self, item_id: &ItemId)
    -> impl Future<Output = Result<i64, LedgerError>> + Send;

    /// Full record, if the item is known.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the store cannot be reached.
    fn get_record(
        &self,
        item_id: &ItemId,
    ) -> impl Future<Output = Result<Option<StockRecord>, LedgerError>> + Send;

    /// Take one unit if any is left, bumping the version and writing an
    /// audit entry in the same atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the store cannot be reached.
    fn decrement_if_positive(
        &self,
        item_id: &ItemId,
    ) -> impl Future<Output = Result<DecrementOutcome, LedgerError>> + Send;

    /// Give back one unit taken by a decrement whose order was recorded as
    /// FAILED. Returns the quantity afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownItem`] if the item has no record, or
    /// [`LedgerError::Store`] if the store cannot be reached.
    fn restore(&self, item_id: &ItemId) -> impl Future<Output = Result<i64, LedgerError>> + Send;

    /// Create or overwrite the quantity of an item (seeding, restocking).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidQuantity`] for negative quantities, or
    /// [`LedgerError::Store`] if the store cannot be reached.
    fn set_quantity(
        &self,
        item_id: &ItemId,
        quantity: i64,
    ) -> impl Future<Output = Result<StockRecord, LedgerError>> + Send;

    /// Decrement audit trail of an item, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the store cannot be reached.
    fn audit_trail(
        &self,
        item_id: &ItemId,
    ) -> impl Future<Output = Result<Vec<StockDecrement>, LedgerError>> + Send;

    /// Check connectivity.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the store cannot be reached.
    fn ping(&self) -> impl Future<Output = Result<(), LedgerError>> + Send;
}
