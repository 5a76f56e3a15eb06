//! In-memory [`LockBackend`].
//!
//! Follows the same grant rules as the Redis backend, with lease expiry
//! judged by an injected [`Clock`] so tests can expire a lease without
//! sleeping.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use stockguard_core::environment::Clock;
use stockguard_core::error::StoreError;
use stockguard_core::lock::{GrantOutcome, LockBackend, ReleaseOutcome};
use stockguard_core::types::{HolderId, LockHandle};

#[derive(Debug, Clone)]
struct Entry {
    holder: HolderId,
    count: u32,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn handle(&self, key: &str) -> LockHandle {
        LockHandle {
            resource_key: key.to_string(),
            holder_id: self.holder,
            hold_count: self.count,
            lease_expires_at: self.expires_at,
        }
    }
}

/// HashMap-backed lock store.
///
/// Clones share state.
#[derive(Clone)]
pub struct InMemoryLockBackend {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
    grant_calls: Arc<AtomicUsize>,
}

impl InMemoryLockBackend {
    /// Create an empty backend judging leases by `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
            grant_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `try_grant` calls so far.
    #[must_use]
    pub fn grant_calls(&self) -> usize {
        self.grant_calls.load(Ordering::SeqCst)
    }

    /// Whether no unexpired lock exists.
    ///
    /// A poisoned table is still read; the entries themselves stay valid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .all(|entry| entry.expires_at <= now)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory lock store switched off".into()))
        } else {
            Ok(())
        }
    }

    fn grant(&self, key: &str, holder: &HolderId, lease: Duration) -> Result<GrantOutcome, StoreError> {
        self.grant_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let lease = TimeDelta::from_std(lease)
            .map_err(|e| StoreError::Corrupt(format!("lease out of range: {e}")))?;
        let now = self.clock.now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("lock table poisoned".into()))?;

        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
        }

        match entries.get_mut(key) {
            None => {
                let entry = Entry {
                    holder: *holder,
                    count: 1,
                    expires_at: now + lease,
                };
                let handle = entry.handle(key);
                entries.insert(key.to_string(), entry);
                Ok(GrantOutcome::Acquired(handle))
            }
            Some(entry) if entry.holder == *holder => {
                entry.count = entry
                    .count
                    .checked_add(1)
                    .ok_or_else(|| StoreError::Corrupt(format!("hold count overflow on {key}")))?;
                Ok(GrantOutcome::Reentered(entry.handle(key)))
            }
            Some(entry) => Ok(GrantOutcome::Busy {
                holder: entry.holder,
                remaining: (entry.expires_at - now).to_std().unwrap_or_default(),
            }),
        }
    }

    fn release_one(&self, key: &str, holder: &HolderId) -> Result<ReleaseOutcome, StoreError> {
        self.check_available()?;

        let now = self.clock.now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("lock table poisoned".into()))?;

        let Some(entry) = entries.get_mut(key) else {
            return Ok(ReleaseOutcome::NotHeld);
        };
        if entry.holder != *holder || entry.expires_at <= now {
            return Ok(ReleaseOutcome::NotHeld);
        }

        entry.count -= 1;
        if entry.count == 0 {
            entries.remove(key);
            Ok(ReleaseOutcome::Freed)
        } else {
            Ok(ReleaseOutcome::Decremented {
                remaining_holds: entry.count,
            })
        }
    }

    fn lookup(&self, key: &str) -> Result<Option<LockHandle>, StoreError> {
        self.check_available()?;

        let now = self.clock.now();
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("lock table poisoned".into()))?;

        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.handle(key)))
    }
}

impl std::fmt::Debug for InMemoryLockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLockBackend")
            .field("unavailable", &self.unavailable)
            .finish_non_exhaustive()
    }
}

impl LockBackend for InMemoryLockBackend {
    fn try_grant(
        &self,
        key: &str,
        holder: &HolderId,
        lease: Duration,
    ) -> impl Future<Output = Result<GrantOutcome, StoreError>> + Send {
        let result = self.grant(key, holder, lease);
        async move { result }
    }

    fn release(
        &self,
        key: &str,
        holder: &HolderId,
    ) -> impl Future<Output = Result<ReleaseOutcome, StoreError>> + Send {
        let result = self.release_one(key, holder);
        async move { result }
    }

    fn inspect(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<LockHandle>, StoreError>> + Send {
        let result = self.lookup(key);
        async move { result }
    }

    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self.check_available();
        async move { result }
    }
}
