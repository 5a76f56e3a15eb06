//! Domain types for stock reservation.
//!
//! Identifiers, the lock handle and token, stock records and order records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::StoreError;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a goods item (the `goodsId` of the order endpoint).
///
/// Also the resource key the reservation lock is taken on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    /// Create an `ItemId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique identifier for an order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a new random `OrderId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OrderId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who asked for the reservation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester(String);

impl Requester {
    /// Create a `Requester`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the requester name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one logical call chain.
///
/// Every top-level reservation starts a new chain. A nested call that must
/// observe reentrant lock semantics passes the chain it was given instead of
/// starting a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallChain(Uuid);

impl CallChain {
    /// Start a new call chain.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `CallChain` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CallChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Lock
// ============================================================================

/// Holder identity of a lock: process instance plus call chain.
///
/// Two holders are the same holder only if both parts match, so two requests
/// handled by the same process never share a lock by accident.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId {
    /// Identity of the `LeaseLock` instance (one per process).
    pub instance: Uuid,
    /// Logical call chain within that instance.
    pub chain: CallChain,
}

impl HolderId {
    /// Create a holder identity.
    #[must_use]
    pub const fn new(instance: Uuid, chain: CallChain) -> Self {
        Self { instance, chain }
    }

    /// Parse the `"{instance}:{chain}"` form written to lock stores.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the value is not two colon-separated UUIDs.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        let (instance, chain) = value
            .split_once(':')
            .ok_or_else(|| StoreError::Corrupt(format!("invalid holder id: {value}")))?;
        let instance = Uuid::parse_str(instance)
            .map_err(|e| StoreError::Corrupt(format!("invalid holder instance {instance}: {e}")))?;
        let chain = Uuid::parse_str(chain)
            .map_err(|e| StoreError::Corrupt(format!("invalid holder chain {chain}: {e}")))?;
        Ok(Self::new(instance, CallChain::from_uuid(chain)))
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance, self.chain)
    }
}

/// State of a held lock as recorded by the lock store.
///
/// `hold_count > 0` means the lock is held by `holder_id`. The lease is set
/// when the lock is first granted and is not extended by reentrant grants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    /// Resource the lock protects.
    pub resource_key: String,
    /// Current holder.
    pub holder_id: HolderId,
    /// Number of outstanding acquisitions by the holder.
    pub hold_count: u32,
    /// When the lease runs out.
    pub lease_expires_at: DateTime<Utc>,
}

impl LockHandle {
    /// Whether the handle is held by `holder` at `now`.
    #[must_use]
    pub fn is_held_by(&self, holder: &HolderId, now: DateTime<Utc>) -> bool {
        self.hold_count > 0 && self.holder_id == *holder && now < self.lease_expires_at
    }
}

/// Proof of one successful acquisition, handed back to `release`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken {
    /// Resource the lock protects.
    pub resource_key: String,
    /// Holder that acquired it.
    pub holder: HolderId,
    /// Lease deadline of the underlying grant.
    pub lease_expires_at: DateTime<Utc>,
    /// Whether this acquisition re-entered a lock the holder already had.
    pub reentrant: bool,
}

// ============================================================================
// Stock
// ============================================================================

/// Authoritative stock counter of one item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    /// Item the counter belongs to.
    pub item_id: ItemId,
    /// Units left; never negative.
    pub quantity: i64,
    /// Bumped on every successful mutation.
    pub version: i64,
}

/// Audit entry written for every successful decrement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDecrement {
    /// Item that was decremented.
    pub item_id: ItemId,
    /// Quantity after the decrement.
    pub new_quantity: i64,
    /// Version after the decrement.
    pub version: i64,
    /// When it happened.
    pub at: DateTime<Utc>,
}

// ============================================================================
// Orders
// ============================================================================

/// Status of an order record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Written before the stock decrement is attempted.
    Pending,
    /// Stock was decremented and the order accepted.
    Confirmed,
    /// Rejected or failed; see the failure reason.
    Failed,
}

impl OrderStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::Corrupt(format!("invalid order status: {s}"))),
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an order ended up FAILED.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No stock left.
    OutOfStock,
    /// The item lock could not be acquired in time.
    LockTimeout,
    /// A store stayed unreachable past the retry budget.
    StoreUnavailable,
    /// The lease ran out before the order could be recorded.
    LeaseLost,
}

impl FailureReason {
    /// Convert reason to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfStock => "out_of_stock",
            Self::LockTimeout => "lock_timeout",
            Self::StoreUnavailable => "store_unavailable",
            Self::LeaseLost => "lease_lost",
        }
    }

    /// Parse reason from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string doesn't match a known reason.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "out_of_stock" => Ok(Self::OutOfStock),
            "lock_timeout" => Ok(Self::LockTimeout),
            "store_unavailable" => Ok(Self::StoreUnavailable),
            "lease_lost" => Ok(Self::LeaseLost),
            _ => Err(StoreError::Corrupt(format!("invalid failure reason: {s}"))),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted purchase attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Unique order id; doubles as the idempotency key.
    pub order_id: OrderId,
    /// Item being purchased.
    pub item_id: ItemId,
    /// Who asked.
    pub requester: Requester,
    /// When the PENDING record was written.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
    /// Current status.
    pub status: OrderStatus,
    /// Set once the order is FAILED.
    pub failure_reason: Option<FailureReason>,
}

impl OrderRecord {
    /// Create a PENDING record.
    #[must_use]
    pub fn pending(
        order_id: OrderId,
        item_id: ItemId,
        requester: Requester,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            item_id,
            requester,
            created_at: now,
            updated_at: now,
            status: OrderStatus::Pending,
            failure_reason: None,
        }
    }
}
