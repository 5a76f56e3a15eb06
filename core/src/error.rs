//! Error taxonomy for stock reservation.
//!
//! Storage errors are split per collaborator so the coordinator can tell an
//! idempotency hit from an outage. Reservation errors are the user-visible
//! terminal rejections.

use thiserror::Error;

use crate::types::{FailureReason, ItemId, OrderId, OrderRecord};

/// Failure talking to an external store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the command failed in transit.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with data this crate cannot interpret.
    #[error("Corrupt store data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns `true` if retrying the same command may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors from a [`StockLedger`](crate::ledger::StockLedger).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stock quantities are never negative.
    #[error("Invalid stock quantity {quantity} for item {item_id}")]
    InvalidQuantity {
        /// Item the write targeted
        item_id: ItemId,
        /// Rejected quantity
        quantity: i64,
    },

    /// The item has no stock record.
    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),
}

/// Errors from an [`OrderLog`](crate::order_log::OrderLog).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderLogError {
    /// The order id was already used; carries the stored record.
    #[error("Duplicate order {}", existing.order_id)]
    DuplicateOrder {
        /// Record already stored under the id
        existing: Box<OrderRecord>,
    },

    /// No record exists for the order id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a finished reservation looks to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// One unit was reserved.
    Accepted,
    /// Rejected for a business reason (no stock).
    RejectedBusiness,
    /// Rejected because of contention or infrastructure; retry later.
    RejectedSystem,
}

impl Outcome {
    /// Wire representation used in response headers and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::RejectedBusiness => "rejected-business",
            Self::RejectedSystem => "rejected-system",
        }
    }
}

/// Terminal rejection of a reservation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// The item lock could not be acquired within the wait budget.
    #[error("Timed out waiting for lock on item {item_id} (order {order_id})")]
    LockTimeout {
        /// Order that was rejected
        order_id: OrderId,
        /// Contended item
        item_id: ItemId,
    },

    /// No stock left.
    #[error("Item {item_id} is out of stock (order {order_id})")]
    OutOfStock {
        /// Order that was rejected
        order_id: OrderId,
        /// Exhausted item
        item_id: ItemId,
    },

    /// A store stayed unreachable past the retry budget, or the lease was
    /// lost before the outcome could be recorded.
    #[error("Reservation failed for order {order_id}: {detail}")]
    StoreUnavailable {
        /// Order that was rejected
        order_id: OrderId,
        /// What failed
        detail: String,
    },

    /// Another attempt with the same order id has not finished yet.
    #[error("Order {order_id} is still in flight")]
    OrderInFlight {
        /// Order that is still PENDING
        order_id: OrderId,
    },
}

impl ReservationError {
    /// Order the rejection belongs to.
    #[must_use]
    pub const fn order_id(&self) -> OrderId {
        match self {
            Self::LockTimeout { order_id, .. }
            | Self::OutOfStock { order_id, .. }
            | Self::StoreUnavailable { order_id, .. }
            | Self::OrderInFlight { order_id } => *order_id,
        }
    }

    /// Caller-facing classification.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        match self {
            Self::OutOfStock { .. } => Outcome::RejectedBusiness,
            Self::LockTimeout { .. }
            | Self::StoreUnavailable { .. }
            | Self::OrderInFlight { .. } => Outcome::RejectedSystem,
        }
    }

    /// Reason recorded on the FAILED order, if this rejection writes one.
    #[must_use]
    pub const fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::LockTimeout { .. } => Some(FailureReason::LockTimeout),
            Self::OutOfStock { .. } => Some(FailureReason::OutOfStock),
            Self::StoreUnavailable { .. } => Some(FailureReason::StoreUnavailable),
            Self::OrderInFlight { .. } => None,
        }
    }

    /// Rebuild the rejection a FAILED order was recorded with.
    ///
    /// Used when a retry with the same order id observes a terminal record.
    #[must_use]
    pub fn from_failed_order(record: &OrderRecord) -> Self {
        let order_id = record.order_id;
        let item_id = record.item_id.clone();
        match record.failure_reason {
            Some(FailureReason::OutOfStock) => Self::OutOfStock { order_id, item_id },
            Some(FailureReason::LockTimeout) => Self::LockTimeout { order_id, item_id },
            Some(FailureReason::LeaseLost) => Self::StoreUnavailable {
                order_id,
                detail: "lease lost before the order was recorded".to_string(),
            },
            Some(FailureReason::StoreUnavailable) | None => Self::StoreUnavailable {
                order_id,
                detail: "store unavailable".to_string(),
            },
        }
    }

    /// Returns `true` if the caller may retry with a new order id.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.outcome(), Outcome::RejectedSystem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderStatus, Requester};
    use chrono::Utc;

    fn failed(reason: Option<FailureReason>) -> OrderRecord {
        let mut record = OrderRecord::pending(
            OrderId::new(),
            ItemId::new("42"),
            Requester::new("alice"),
            Utc::now(),
        );
        record.status = OrderStatus::Failed;
        record.failure_reason = reason;
        record
    }

    #[test]
    fn outcomes_partition_errors() {
        let order_id = OrderId::new();
        let item_id = ItemId::new("42");

        assert_eq!(
            ReservationError::OutOfStock { order_id, item_id: item_id.clone() }.outcome(),
            Outcome::RejectedBusiness
        );
        assert_eq!(
            ReservationError::LockTimeout { order_id, item_id }.outcome(),
            Outcome::RejectedSystem
        );
        assert_eq!(
            ReservationError::OrderInFlight { order_id }.outcome(),
            Outcome::RejectedSystem
        );
    }

    #[test]
    fn failed_orders_replay_their_original_error() {
        let record = failed(Some(FailureReason::OutOfStock));
        assert!(matches!(
            ReservationError::from_failed_order(&record),
            ReservationError::OutOfStock { .. }
        ));

        let record = failed(Some(FailureReason::LockTimeout));
        let err = ReservationError::from_failed_order(&record);
        assert!(matches!(err, ReservationError::LockTimeout { .. }));
        assert_eq!(err.order_id(), record.order_id);

        let record = failed(None);
        assert!(matches!(
            ReservationError::from_failed_order(&record),
            ReservationError::StoreUnavailable { .. }
        ));
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::Corrupt("bad".into()).is_transient());
    }

    #[test]
    fn outcome_wire_strings() {
        assert_eq!(Outcome::Accepted.as_str(), "accepted");
        assert_eq!(Outcome::RejectedBusiness.as_str(), "rejected-business");
        assert_eq!(Outcome::RejectedSystem.as_str(), "rejected-system");
    }
}
