//! In-memory [`StockLedger`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stockguard_core::environment::Clock;
use stockguard_core::error::{LedgerError, StoreError};
use stockguard_core::ledger::{DecrementOutcome, StockLedger};
use stockguard_core::types::{ItemId, StockDecrement, StockRecord};

#[derive(Debug, Default)]
struct Ledger {
    records: HashMap<ItemId, StockRecord>,
    audit: Vec<StockDecrement>,
}

/// HashMap-backed stock ledger.
///
/// Every operation runs under one mutex, which gives the same atomicity as
/// the conditional `UPDATE` of the Postgres ledger. Clones share state.
#[derive(Clone)]
pub struct InMemoryStockLedger {
    inner: Arc<Mutex<Ledger>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
    restores: Arc<AtomicUsize>,
}

impl InMemoryStockLedger {
    /// Create an empty ledger stamping audit entries with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ledger::default())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
            restores: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Seed an item.
    ///
    /// # Panics
    ///
    /// If the mutex is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn with_stock(self, item_id: impl Into<ItemId>, quantity: i64) -> Self {
        let item_id = item_id.into();
        self.inner.lock().unwrap().records.insert(
            item_id.clone(),
            StockRecord {
                item_id,
                quantity,
                version: 0,
            },
        );
        self
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `restore` calls so far.
    #[must_use]
    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    fn with_ledger<T>(
        &self,
        f: impl FnOnce(&mut Ledger) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory ledger switched off".into()).into());
        }
        let mut ledger = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("ledger poisoned".into()))?;
        f(&mut ledger)
    }
}

impl std::fmt::Debug for InMemoryStockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStockLedger")
            .field("unavailable", &self.unavailable)
            .finish_non_exhaustive()
    }
}

impl StockLedger for InMemoryStockLedger {
    fn get_quantity(
        &self,
        item_id: &ItemId,
    ) -> impl Future<Output = Result<i64, LedgerError>> + Send {
        let result = self.with_ledger(|ledger| {
            Ok(ledger.records.get(item_id).map_or(0, |record| record.quantity))
        });
        async move { result }
    }

    fn get_record(
        &self,
        item_id: &ItemId,
    ) -> impl Future<Output = Result<Option<StockRecord>, LedgerError>> + Send {
        let result = self.with_ledger(|ledger| Ok(ledger.records.get(item_id).cloned()));
        async move { result }
    }

    fn decrement_if_positive(
        &self,
        item_id: &ItemId,
    ) -> impl Future<Output = Result<DecrementOutcome, LedgerError>> + Send {
        let now = self.clock.now();
        let result = self.with_ledger(|ledger| {
            let Some(record) = ledger
                .records
                .get_mut(item_id)
                .filter(|record| record.quantity > 0)
            else {
                return Ok(DecrementOutcome::Exhausted);
            };

            record.quantity -= 1;
            record.version += 1;
            let outcome = DecrementOutcome::Decremented {
                new_quantity: record.quantity,
                version: record.version,
            };
            ledger.audit.push(StockDecrement {
                item_id: item_id.clone(),
                new_quantity: record.quantity,
                version: record.version,
                at: now,
            });
            Ok(outcome)
        });
        async move { result }
    }

    fn restore(&self, item_id: &ItemId) -> impl Future<Output = Result<i64, LedgerError>> + Send {
        let result = self.with_ledger(|ledger| {
            let record = ledger
                .records
                .get_mut(item_id)
                .ok_or_else(|| LedgerError::UnknownItem(item_id.clone()))?;
            record.quantity += 1;
            record.version += 1;
            Ok(record.quantity)
        });
        if result.is_ok() {
            self.restores.fetch_add(1, Ordering::SeqCst);
        }
        async move { result }
    }

    fn set_quantity(
        &self,
        item_id: &ItemId,
        quantity: i64,
    ) -> impl Future<Output = Result<StockRecord, LedgerError>> + Send {
        let result = self.with_ledger(|ledger| {
            if quantity < 0 {
                return Err(LedgerError::InvalidQuantity {
                    item_id: item_id.clone(),
                    quantity,
                });
            }
            let record = ledger
                .records
                .entry(item_id.clone())
                .and_modify(|record| {
                    record.quantity = quantity;
                    record.version += 1;
                })
                .or_insert_with(|| StockRecord {
                    item_id: item_id.clone(),
                    quantity,
                    version: 0,
                });
            Ok(record.clone())
        });
        async move { result }
    }

    fn audit_trail(
        &self,
        item_id: &ItemId,
    ) -> impl Future<Output = Result<Vec<StockDecrement>, LedgerError>> + Send {
        let result = self.with_ledger(|ledger| {
            Ok(ledger
                .audit
                .iter()
                .filter(|entry| entry.item_id == *item_id)
                .cloned()
                .collect())
        });
        async move { result }
    }

    fn ping(&self) -> impl Future<Output = Result<(), LedgerError>> + Send {
        let result = self.with_ledger(|_| Ok(()));
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::ManualClock;

    fn ledger() -> InMemoryStockLedger {
        InMemoryStockLedger::new(ManualClock::starting_at_test_epoch().shared())
    }

    #[tokio::test]
    async fn decrement_stops_at_zero() {
        let ledger = ledger().with_stock("42", 2);
        let item = ItemId::new("42");

        assert_eq!(
            ledger.decrement_if_positive(&item).await.unwrap(),
            DecrementOutcome::Decremented {
                new_quantity: 1,
                version: 1
            }
        );
        assert_eq!(
            ledger.decrement_if_positive(&item).await.unwrap(),
            DecrementOutcome::Decremented {
                new_quantity: 0,
                version: 2
            }
        );
        assert_eq!(
            ledger.decrement_if_positive(&item).await.unwrap(),
            DecrementOutcome::Exhausted
        );

        assert_eq!(ledger.get_quantity(&item).await.unwrap(), 0);
        assert_eq!(ledger.audit_trail(&item).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_item_reads_empty() {
        let ledger = ledger();
        let item = ItemId::new("missing");

        assert_eq!(ledger.get_quantity(&item).await.unwrap(), 0);
        assert_eq!(
            ledger.decrement_if_positive(&item).await.unwrap(),
            DecrementOutcome::Exhausted
        );
        assert!(matches!(
            ledger.restore(&item).await,
            Err(LedgerError::UnknownItem(_))
        ));
    }

    #[tokio::test]
    async fn set_quantity_rejects_negative() {
        let ledger = ledger();
        let item = ItemId::new("42");

        assert!(matches!(
            ledger.set_quantity(&item, -1).await,
            Err(LedgerError::InvalidQuantity { quantity: -1, .. })
        ));

        let created = ledger.set_quantity(&item, 3).await.unwrap();
        assert_eq!((created.quantity, created.version), (3, 0));
        let updated = ledger.set_quantity(&item, 5).await.unwrap();
        assert_eq!((updated.quantity, updated.version), (5, 1));
    }

    #[tokio::test]
    async fn restore_returns_a_unit() {
        let ledger = ledger().with_stock("42", 1);
        let item = ItemId::new("42");

        ledger.decrement_if_positive(&item).await.unwrap();
        assert_eq!(ledger.restore(&item).await.unwrap(), 1);
        assert_eq!(ledger.restores(), 1);
    }
}
