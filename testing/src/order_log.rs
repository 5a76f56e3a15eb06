//! In-memory [`OrderLog`] with fault injection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stockguard_core::environment::Clock;
use stockguard_core::error::{OrderLogError, StoreError};
use stockguard_core::order_log::OrderLog;
use stockguard_core::types::{FailureReason, OrderId, OrderRecord, OrderStatus};

/// Counters of upcoming calls that should fail.
#[derive(Debug, Default)]
struct Faults {
    confirms: AtomicUsize,
    confirm_acks: AtomicUsize,
    mark_failed: AtomicUsize,
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected() -> OrderLogError {
    StoreError::Unavailable("injected order log failure".into()).into()
}

/// HashMap-backed order log.
///
/// Clones share state.
#[derive(Clone)]
pub struct InMemoryOrderLog {
    orders: Arc<Mutex<HashMap<OrderId, OrderRecord>>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
    faults: Arc<Faults>,
}

impl InMemoryOrderLog {
    /// Create an empty log stamping records with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            orders: Arc::new(Mutex::new(HashMap::new())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
            faults: Arc::new(Faults::default()),
        }
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` `mark_confirmed` calls without writing.
    pub fn fail_next_confirms(&self, n: usize) {
        self.faults.confirms.store(n, Ordering::SeqCst);
    }

    /// Let the next `n` `mark_confirmed` calls write, then report failure,
    /// as if the acknowledgement was lost.
    pub fn lose_next_confirm_acks(&self, n: usize) {
        self.faults.confirm_acks.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` `mark_failed` calls without writing.
    pub fn fail_next_mark_failed(&self, n: usize) {
        self.faults.mark_failed.store(n, Ordering::SeqCst);
    }

    /// All records, in no particular order.
    ///
    /// # Panics
    ///
    /// If the mutex is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn records(&self) -> Vec<OrderRecord> {
        self.orders.lock().unwrap().values().cloned().collect()
    }

    /// Number of records with `status`.
    #[must_use]
    pub fn count_with_status(&self, status: OrderStatus) -> usize {
        self.records()
            .iter()
            .filter(|record| record.status == status)
            .count()
    }

    fn with_orders<T>(
        &self,
        f: impl FnOnce(&mut HashMap<OrderId, OrderRecord>) -> Result<T, OrderLogError>,
    ) -> Result<T, OrderLogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory order log switched off".into()).into());
        }
        let mut orders = self
            .orders
            .lock()
            .map_err(|_| StoreError::Unavailable("order log poisoned".into()))?;
        f(&mut orders)
    }

    fn transition(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        reason: Option<FailureReason>,
    ) -> Result<OrderStatus, OrderLogError> {
        let now = self.clock.now();
        self.with_orders(|orders| {
            let record = orders
                .get_mut(&order_id)
                .ok_or(OrderLogError::NotFound(order_id))?;
            if record.status.is_terminal() {
                return Ok(record.status);
            }
            record.status = status;
            record.failure_reason = reason;
            record.updated_at = now;
            Ok(status)
        })
    }
}

impl std::fmt::Debug for InMemoryOrderLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryOrderLog")
            .field("unavailable", &self.unavailable)
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

impl OrderLog for InMemoryOrderLog {
    fn append_pending(
        &self,
        order: &OrderRecord,
    ) -> impl Future<Output = Result<(), OrderLogError>> + Send {
        let result = self.with_orders(|orders| {
            if let Some(existing) = orders.get(&order.order_id) {
                return Err(OrderLogError::DuplicateOrder {
                    existing: Box::new(existing.clone()),
                });
            }
            orders.insert(order.order_id, order.clone());
            Ok(())
        });
        async move { result }
    }

    fn mark_confirmed(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<OrderStatus, OrderLogError>> + Send {
        let result = if take(&self.faults.confirms) {
            Err(injected())
        } else {
            self.transition(order_id, OrderStatus::Confirmed, None)
                .and_then(|status| {
                    if take(&self.faults.confirm_acks) {
                        Err(injected())
                    } else {
                        Ok(status)
                    }
                })
        };
        async move { result }
    }

    fn mark_failed(
        &self,
        order_id: OrderId,
        reason: FailureReason,
    ) -> impl Future<Output = Result<OrderStatus, OrderLogError>> + Send {
        let result = if take(&self.faults.mark_failed) {
            Err(injected())
        } else {
            self.transition(order_id, OrderStatus::Failed, Some(reason))
        };
        async move { result }
    }

    fn get(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<OrderRecord>, OrderLogError>> + Send {
        let result = self.with_orders(|orders| Ok(orders.get(&order_id).cloned()));
        async move { result }
    }

    fn ping(&self) -> impl Future<Output = Result<(), OrderLogError>> + Send {
        let result = self.with_orders(|_| Ok(()));
        async move { result }
    }
}
