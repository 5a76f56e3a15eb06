//! Reservation coordinator.
//!
//! Reserves one unit of an item for one order, guarded by the item's lease
//! lock:
//!
//! ```text
//! START ─▶ LOCK_ACQUIRED ─▶ STOCK_CHECKED ─▶ DECREMENTED ─▶ CONFIRMED
//!   │            │                 │
//!   │            │                 └─▶ REJECTED (out of stock)
//!   │            └─▶ ERROR (lease lost, store down)
//!   └─▶ LOCK_TIMEOUT
//! ```
//!
//! The order is written PENDING before anything else, so the order id acts as
//! the idempotency key: a retry of a finished order replays its terminal state
//! instead of running again. The lock is released exactly once per
//! acquisition, after the critical section, and only while the caller still
//! holds it.
//!
//! Each reservation runs on its own task. Dropping the future returned by
//! [`ReservationCoordinator::reserve`] abandons the answer, not the work:
//! the order still reaches a terminal state and the lock is still released.

use crate::lease_lock::{AcquireError, LeaseLock};
use crate::metrics::{LeaseLockMetrics, ReservationMetrics};
use crate::retry::{RetryPolicy, retry_with_predicate};
use std::sync::Arc;
use std::time::Duration;
use stockguard_core::environment::{Clock, SystemClock};
use stockguard_core::error::{OrderLogError, Outcome, ReservationError};
use stockguard_core::ledger::{DecrementOutcome, StockLedger};
use stockguard_core::lock::LockBackend;
use stockguard_core::order_log::OrderLog;
use stockguard_core::types::{
    CallChain, FailureReason, ItemId, LockToken, OrderId, OrderRecord, OrderStatus, Requester,
};
use tokio::time::Instant;
use tracing::Instrument;

/// Timing and retry knobs of a [`ReservationCoordinator`].
#[derive(Debug, Clone)]
pub struct ReservationSettings {
    /// How long to wait for the item lock.
    pub wait_timeout: Duration,
    /// Lease granted on the item lock.
    pub lease_duration: Duration,
    /// Retries for order status writes, which are idempotent.
    pub status_write_retry: RetryPolicy,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(10),
            lease_duration: Duration::from_secs(25),
            status_write_retry: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(20))
                .max_delay(Duration::from_millis(200))
                .build(),
        }
    }
}

/// One purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    /// Item to reserve.
    pub item_id: ItemId,
    /// Who asks.
    pub requester: Requester,
    /// Caller-supplied order id; a fresh one is generated when absent.
    pub order_id: Option<OrderId>,
}

impl ReservationRequest {
    /// Request one unit of `item_id` under a generated order id.
    #[must_use]
    pub fn new(item_id: impl Into<ItemId>, requester: Requester) -> Self {
        Self {
            item_id: item_id.into(),
            requester,
            order_id: None,
        }
    }

    /// Use `order_id` as the idempotency key.
    #[must_use]
    pub const fn with_order_id(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

/// An accepted reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationReceipt {
    /// Confirmed order.
    pub order_id: OrderId,
    /// Reserved item.
    pub item_id: ItemId,
    /// Stock left right after this decrement; `None` for replays and
    /// compensation paths.
    pub remaining_quantity: Option<i64>,
    /// The order had already been confirmed by an earlier attempt.
    pub replayed: bool,
    /// The lease ran out inside the critical section.
    pub lease_lost: bool,
}

/// States of one reservation, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    /// PENDING record written.
    Start,
    /// Item lock held.
    LockAcquired,
    /// Stock looked at.
    StockChecked,
    /// One unit taken.
    Decremented,
    /// Order confirmed.
    Confirmed,
    /// No stock left.
    Rejected,
    /// Lock not acquired in time.
    LockTimeout,
    /// Infrastructure failure or lost lease.
    Error,
}

impl ReservationState {
    /// Log representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::LockAcquired => "LOCK_ACQUIRED",
            Self::StockChecked => "STOCK_CHECKED",
            Self::Decremented => "DECREMENTED",
            Self::Confirmed => "CONFIRMED",
            Self::Rejected => "REJECTED",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::Error => "ERROR",
        }
    }
}

fn transition(state: ReservationState) {
    tracing::debug!(state = state.as_str(), "Reservation state");
}

fn is_transient(err: &OrderLogError) -> bool {
    matches!(err, OrderLogError::Store(e) if e.is_transient())
}

/// Orchestrates lock, ledger and order log for single-unit reservations.
pub struct ReservationCoordinator<L, S, O>
where
    L: LockBackend,
    S: StockLedger,
    O: OrderLog,
{
    lock: Arc<LeaseLock<L>>,
    ledger: Arc<S>,
    orders: Arc<O>,
    clock: Arc<dyn Clock>,
    settings: ReservationSettings,
}

impl<L, S, O> ReservationCoordinator<L, S, O>
where
    L: LockBackend,
    S: StockLedger,
    O: OrderLog,
{
    /// Create a coordinator with default settings and the system clock.
    #[must_use]
    pub fn new(lock: Arc<LeaseLock<L>>, ledger: Arc<S>, orders: Arc<O>) -> Self {
        Self {
            lock,
            ledger,
            orders,
            clock: Arc::new(SystemClock),
            settings: ReservationSettings::default(),
        }
    }

    /// Timestamp order records with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ReservationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The item lock.
    #[must_use]
    pub fn lease_lock(&self) -> &LeaseLock<L> {
        &self.lock
    }

    /// The stock ledger.
    #[must_use]
    pub fn ledger(&self) -> &S {
        &self.ledger
    }

    /// The order log.
    #[must_use]
    pub fn orders(&self) -> &O {
        &self.orders
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &ReservationSettings {
        &self.settings
    }

    /// Reserve one unit in a new call chain.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::OutOfStock`] if no unit is left
    /// - [`ReservationError::LockTimeout`] if the item stayed locked
    /// - [`ReservationError::StoreUnavailable`] if a store failed or the
    ///   lease was lost before the decrement
    /// - [`ReservationError::OrderInFlight`] if the order id is still PENDING
    pub async fn reserve(
        &self,
        request: ReservationRequest,
    ) -> Result<ReservationReceipt, ReservationError>
    where
        L: 'static,
        S: 'static,
        O: 'static,
    {
        self.reserve_in_chain(&CallChain::new(), request).await
    }

    /// Reserve one unit as part of an existing call chain.
    ///
    /// A chain that already holds the item lock re-enters it instead of
    /// waiting on itself.
    ///
    /// # Errors
    ///
    /// Same as [`reserve`](Self::reserve).
    pub async fn reserve_in_chain(
        &self,
        chain: &CallChain,
        request: ReservationRequest,
    ) -> Result<ReservationReceipt, ReservationError>
    where
        L: 'static,
        S: 'static,
        O: 'static,
    {
        let started = Instant::now();
        let order_id = request.order_id.unwrap_or_default();
        let span = tracing::info_span!(
            "reserve",
            order_id = %order_id,
            item_id = %request.item_id,
            requester = %request.requester,
            chain = %chain,
        );

        let this = self.clone();
        let chain = *chain;
        let task = tokio::spawn(
            async move { this.run(&chain, order_id, request).await }.instrument(span.clone()),
        );
        let result = task.await.unwrap_or_else(|e| {
            span.in_scope(|| tracing::error!(error = %e, "Reservation task failed"));
            Err(ReservationError::StoreUnavailable {
                order_id,
                detail: format!("reservation task failed: {e}"),
            })
        });

        let outcome = match &result {
            Ok(_) => Outcome::Accepted,
            Err(e) => e.outcome(),
        };
        ReservationMetrics::record_outcome(outcome, started.elapsed());
        span.in_scope(|| match &result {
            Ok(receipt) => tracing::info!(
                outcome = outcome.as_str(),
                replayed = receipt.replayed,
                remaining = ?receipt.remaining_quantity,
                "Reservation accepted"
            ),
            Err(e) => tracing::info!(outcome = outcome.as_str(), error = %e, "Reservation rejected"),
        });

        result
    }

    async fn run(
        &self,
        chain: &CallChain,
        order_id: OrderId,
        request: ReservationRequest,
    ) -> Result<ReservationReceipt, ReservationError> {
        let ReservationRequest {
            item_id, requester, ..
        } = request;

        let record = OrderRecord::pending(order_id, item_id.clone(), requester, self.clock.now());
        match self.orders.append_pending(&record).await {
            Ok(()) => transition(ReservationState::Start),
            Err(OrderLogError::DuplicateOrder { existing }) => return Self::replay(&existing),
            Err(e) => {
                tracing::error!(error = %e, "Could not record pending order");
                return Err(ReservationError::StoreUnavailable {
                    order_id,
                    detail: format!("order log: {e}"),
                });
            }
        }

        let token = match self
            .lock
            .try_acquire(
                item_id.as_str(),
                chain,
                self.settings.wait_timeout,
                self.settings.lease_duration,
            )
            .await
        {
            Ok(token) => token,
            Err(AcquireError::TimedOut { waited, .. }) => {
                transition(ReservationState::LockTimeout);
                tracing::warn!(?waited, "Item lock not acquired");
                self.record_failure(order_id, FailureReason::LockTimeout).await;
                return Err(ReservationError::LockTimeout { order_id, item_id });
            }
            Err(AcquireError::StoreUnavailable { source, .. }) => {
                transition(ReservationState::Error);
                self.record_failure(order_id, FailureReason::StoreUnavailable)
                    .await;
                return Err(ReservationError::StoreUnavailable {
                    order_id,
                    detail: format!("lock store: {source}"),
                });
            }
        };
        transition(ReservationState::LockAcquired);

        let result = self.critical_section(&token, order_id, &item_id).await;
        self.release_if_held(&token).await;
        result
    }

    fn replay(existing: &OrderRecord) -> Result<ReservationReceipt, ReservationError> {
        tracing::info!(status = %existing.status, "Order already exists");
        match existing.status {
            OrderStatus::Confirmed => Ok(ReservationReceipt {
                order_id: existing.order_id,
                item_id: existing.item_id.clone(),
                remaining_quantity: None,
                replayed: true,
                lease_lost: false,
            }),
            OrderStatus::Failed => Err(ReservationError::from_failed_order(existing)),
            OrderStatus::Pending => Err(ReservationError::OrderInFlight {
                order_id: existing.order_id,
            }),
        }
    }

    async fn critical_section(
        &self,
        token: &LockToken,
        order_id: OrderId,
        item_id: &ItemId,
    ) -> Result<ReservationReceipt, ReservationError> {
        if !self.lock.is_held_by_caller(token).await {
            transition(ReservationState::Error);
            LeaseLockMetrics::record_lease_lost();
            tracing::warn!(
                lease_expires_at = %token.lease_expires_at,
                "Lease lost before stock was touched"
            );
            self.record_failure(order_id, FailureReason::LeaseLost).await;
            return Err(ReservationError::StoreUnavailable {
                order_id,
                detail: "lease lost before the stock decrement".to_string(),
            });
        }

        let decrement = self.ledger.decrement_if_positive(item_id).await;
        transition(ReservationState::StockChecked);

        let new_quantity = match decrement {
            Ok(DecrementOutcome::Decremented { new_quantity, .. }) => new_quantity,
            Ok(DecrementOutcome::Exhausted) => {
                transition(ReservationState::Rejected);
                self.record_failure(order_id, FailureReason::OutOfStock).await;
                return Err(ReservationError::OutOfStock {
                    order_id,
                    item_id: item_id.clone(),
                });
            }
            Err(e) => {
                transition(ReservationState::Error);
                tracing::error!(error = %e, "Stock decrement failed");
                self.record_failure(order_id, FailureReason::StoreUnavailable)
                    .await;
                return Err(ReservationError::StoreUnavailable {
                    order_id,
                    detail: format!("stock ledger: {e}"),
                });
            }
        };
        transition(ReservationState::Decremented);

        let lease_lost = !self.lock.is_held_by_caller(token).await;
        if lease_lost {
            LeaseLockMetrics::record_lease_lost();
            tracing::warn!(
                lease_expires_at = %token.lease_expires_at,
                new_quantity,
                "Lease ran out inside the critical section"
            );
        }

        let accepted = |remaining_quantity| ReservationReceipt {
            order_id,
            item_id: item_id.clone(),
            remaining_quantity,
            replayed: false,
            lease_lost,
        };

        match self.write_status(order_id, None).await {
            Ok(OrderStatus::Confirmed) => {
                transition(ReservationState::Confirmed);
                Ok(accepted(Some(new_quantity)))
            }
            Ok(status) => {
                tracing::error!(%status, "Order left PENDING after decrement");
                self.compensate(order_id, item_id, format!("order ended {status}"))
                    .await
                    .map(|()| accepted(None))
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not confirm order");
                self.compensate(order_id, item_id, format!("order log: {e}"))
                    .await
                    .map(|()| accepted(None))
            }
        }
    }

    /// Undo a decrement whose order could not be confirmed.
    ///
    /// `Ok(())` means the order turned out CONFIRMED after all.
    async fn compensate(
        &self,
        order_id: OrderId,
        item_id: &ItemId,
        detail: String,
    ) -> Result<(), ReservationError> {
        match self
            .write_status(order_id, Some(FailureReason::StoreUnavailable))
            .await
        {
            Ok(OrderStatus::Confirmed) => {
                transition(ReservationState::Confirmed);
                Ok(())
            }
            Ok(OrderStatus::Failed) => {
                transition(ReservationState::Error);
                match self.ledger.restore(item_id).await {
                    Ok(quantity) => {
                        ReservationMetrics::record_compensation();
                        tracing::warn!(quantity, "Returned reserved unit to stock");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Unit not returned to stock, needs reconciliation");
                    }
                }
                Err(ReservationError::StoreUnavailable { order_id, detail })
            }
            Ok(OrderStatus::Pending) | Err(_) => {
                transition(ReservationState::Error);
                tracing::error!("Order stays PENDING with stock taken, needs reconciliation");
                Err(ReservationError::StoreUnavailable { order_id, detail })
            }
        }
    }

    async fn record_failure(&self, order_id: OrderId, reason: FailureReason) {
        match self.write_status(order_id, Some(reason)).await {
            Ok(OrderStatus::Failed) => {}
            Ok(status) => tracing::warn!(%status, %reason, "Order already terminal"),
            Err(e) => {
                tracing::error!(error = %e, %reason, "Could not mark order failed, it stays PENDING");
            }
        }
    }

    /// Confirm (`reason == None`) or fail the order, retrying transient
    /// store errors. Both writes are no-ops on terminal records.
    async fn write_status(
        &self,
        order_id: OrderId,
        reason: Option<FailureReason>,
    ) -> Result<OrderStatus, OrderLogError> {
        let orders = &self.orders;
        retry_with_predicate(
            self.settings.status_write_retry.clone(),
            || async move {
                match reason {
                    None => orders.mark_confirmed(order_id).await,
                    Some(reason) => orders.mark_failed(order_id, reason).await,
                }
            },
            is_transient,
        )
        .await
    }

    async fn release_if_held(&self, token: &LockToken) {
        if self.lock.is_held_by_caller(token).await {
            self.lock.release(token).await;
        } else {
            tracing::warn!(
                key = %token.resource_key,
                lease_expires_at = %token.lease_expires_at,
                "Skipping release of a lock no longer held"
            );
        }
    }
}

// Manual impl: the stores themselves need not be `Clone`.
impl<L, S, O> Clone for ReservationCoordinator<L, S, O>
where
    L: LockBackend,
    S: StockLedger,
    O: OrderLog,
{
    fn clone(&self) -> Self {
        Self {
            lock: Arc::clone(&self.lock),
            ledger: Arc::clone(&self.ledger),
            orders: Arc::clone(&self.orders),
            clock: Arc::clone(&self.clock),
            settings: self.settings.clone(),
        }
    }
}

impl<L, S, O> std::fmt::Debug for ReservationCoordinator<L, S, O>
where
    L: LockBackend,
    S: StockLedger,
    O: OrderLog,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationCoordinator")
            .field("lock", &self.lock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
