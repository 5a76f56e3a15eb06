//! Named, reentrant, lease-bounded lock.
//!
//! [`LeaseLock`] turns a [`LockBackend`]'s single-shot grants into the
//! blocking-with-timeout acquisition the reservation flow needs:
//!
//! 1. Ask the backend for the key (one atomic store operation)
//! 2. If another holder has it, or the store is unreachable, back off and ask
//!    again until the wait budget runs out
//! 3. Hand back a [`LockToken`] carrying the lease deadline
//!
//! # Leases
//!
//! A grant is valid until `lease_expires_at`, fixed at first acquisition.
//! There is no renewal: a holder that runs past its lease loses exclusivity
//! and another caller may acquire the key while the first is still working.
//! [`LeaseLock::is_held_by_caller`] is how the first holder finds out.
//!
//! # Reentrancy
//!
//! The holder identity is `(lock instance, call chain)`. Acquiring a key the
//! same chain already holds increments its hold count without touching the
//! lease; each acquisition needs its own [`LeaseLock::release`].
//!
//! # Example
//!
//! ```no_run
//! use stockguard_core::types::CallChain;
//! use stockguard_core::lock::LockBackend;
//! use stockguard_runtime::lease_lock::LeaseLock;
//! use std::time::Duration;
//!
//! # async fn example<B: LockBackend>(lock: LeaseLock<B>) -> Result<(), Box<dyn std::error::Error>> {
//! let chain = CallChain::new();
//! let token = lock
//!     .try_acquire("42", &chain, Duration::from_secs(10), Duration::from_secs(25))
//!     .await?;
//!
//! // ... critical section ...
//!
//! if lock.is_held_by_caller(&token).await {
//!     lock.release(&token).await;
//! }
//! # Ok(())
//! # }
//! ```

use crate::metrics::LeaseLockMetrics;
use crate::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use stockguard_core::environment::{Clock, SystemClock};
use stockguard_core::error::StoreError;
use stockguard_core::lock::{GrantOutcome, LockBackend, ReleaseOutcome};
use stockguard_core::types::{CallChain, HolderId, LockHandle, LockToken};
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout};
use uuid::Uuid;

/// Shortest sleep between two grant attempts on a busy key.
const MIN_POLL_DELAY: Duration = Duration::from_millis(1);

/// Why [`LeaseLock::try_acquire`] gave up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// Another holder kept the key for the whole wait budget.
    #[error("Timed out after {waited:?} waiting for lock {key}")]
    TimedOut {
        /// Contended key
        key: String,
        /// How long the caller waited
        waited: Duration,
    },

    /// The last attempt inside the wait budget failed to reach the store.
    #[error("Lock store unavailable for {key}: {source}")]
    StoreUnavailable {
        /// Requested key
        key: String,
        /// Last store error
        source: StoreError,
    },
}

/// Tuning for [`LeaseLock`].
#[derive(Debug, Clone)]
pub struct LeaseLockConfig {
    /// Backoff between grant attempts while waiting.
    pub poll: RetryPolicy,
    /// Upper bound on a single release round-trip.
    pub release_timeout: Duration,
}

impl Default for LeaseLockConfig {
    fn default() -> Self {
        Self {
            poll: RetryPolicy::lock_polling(),
            release_timeout: Duration::from_secs(2),
        }
    }
}

/// Reentrant lease lock over a [`LockBackend`].
pub struct LeaseLock<B: LockBackend> {
    instance: Uuid,
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    config: LeaseLockConfig,
}

impl<B: LockBackend> LeaseLock<B> {
    /// Create a lock with a fresh instance identity and the system clock.
    #[must_use]
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    /// Create a lock reading time from `clock`.
    ///
    /// The clock must be the one the backend judges lease expiry by.
    #[must_use]
    pub fn with_clock(backend: Arc<B>, clock: Arc<dyn Clock>) -> Self {
        Self {
            instance: Uuid::new_v4(),
            backend,
            clock,
            config: LeaseLockConfig::default(),
        }
    }

    /// Replace the tuning.
    #[must_use]
    pub fn with_config(mut self, config: LeaseLockConfig) -> Self {
        self.config = config;
        self
    }

    /// Identity of this lock instance (one per process).
    #[must_use]
    pub const fn instance(&self) -> Uuid {
        self.instance
    }

    /// Holder identity used for `chain`.
    #[must_use]
    pub const fn holder_for(&self, chain: &CallChain) -> HolderId {
        HolderId::new(self.instance, *chain)
    }

    /// Underlying backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Acquire `key` for `chain`, waiting up to `wait_timeout`.
    ///
    /// A fresh grant leases the key for `lease`. If the chain already holds
    /// the key within its lease, the hold count goes up and the original
    /// lease is kept. A `wait_timeout` of zero makes exactly one attempt.
    ///
    /// # Errors
    ///
    /// - [`AcquireError::TimedOut`] if another holder kept the key
    /// - [`AcquireError::StoreUnavailable`] if the last attempt could not
    ///   reach the store
    pub async fn try_acquire(
        &self,
        key: &str,
        chain: &CallChain,
        wait_timeout: Duration,
        lease: Duration,
    ) -> Result<LockToken, AcquireError> {
        let holder = self.holder_for(chain);
        let started = Instant::now();
        let deadline = started + wait_timeout;
        let mut attempt = 0usize;

        loop {
            let mut lease_hint = None;
            let store_error = match self.backend.try_grant(key, &holder, lease).await {
                Ok(GrantOutcome::Acquired(handle)) => {
                    return Ok(self.granted(handle, false, started.elapsed(), attempt));
                }
                Ok(GrantOutcome::Reentered(handle)) => {
                    return Ok(self.granted(handle, true, started.elapsed(), attempt));
                }
                Ok(GrantOutcome::Busy {
                    holder: owner,
                    remaining,
                }) => {
                    tracing::trace!(
                        key,
                        holder = %holder,
                        owner = %owner,
                        remaining_ms = remaining.as_millis(),
                        "Lock busy"
                    );
                    lease_hint = Some(remaining);
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        key,
                        holder = %holder,
                        attempt,
                        error = %e,
                        "Lock store error while acquiring"
                    );
                    Some(e)
                }
            };

            let now = Instant::now();
            if now >= deadline {
                let waited = started.elapsed();
                return Err(match store_error {
                    Some(source) => {
                        LeaseLockMetrics::record_acquire("store_unavailable", waited);
                        tracing::warn!(key, holder = %holder, ?waited, "Lock store unavailable, giving up");
                        AcquireError::StoreUnavailable {
                            key: key.to_string(),
                            source,
                        }
                    }
                    None => {
                        LeaseLockMetrics::record_acquire("timed_out", waited);
                        tracing::info!(key, holder = %holder, ?waited, "Timed out waiting for lock");
                        AcquireError::TimedOut {
                            key: key.to_string(),
                            waited,
                        }
                    }
                });
            }

            let mut delay = self.config.poll.jittered_delay(attempt);
            if let Some(remaining) = lease_hint {
                delay = delay.min(remaining.max(MIN_POLL_DELAY));
            }
            delay = delay.min(deadline - now);

            sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    fn granted(
        &self,
        handle: LockHandle,
        reentrant: bool,
        waited: Duration,
        attempt: usize,
    ) -> LockToken {
        LeaseLockMetrics::record_acquire(if reentrant { "reentered" } else { "acquired" }, waited);
        tracing::debug!(
            key = %handle.resource_key,
            holder = %handle.holder_id,
            hold_count = handle.hold_count,
            lease_expires_at = %handle.lease_expires_at,
            reentrant,
            attempts = attempt + 1,
            "Lock acquired"
        );

        LockToken {
            resource_key: handle.resource_key,
            holder: handle.holder_id,
            lease_expires_at: handle.lease_expires_at,
            reentrant,
        }
    }

    /// Release one acquisition.
    ///
    /// Best-effort and never fails: a lease that already expired or was
    /// reassigned yields [`ReleaseOutcome::NotHeld`], an unreachable store
    /// [`ReleaseOutcome::StoreFailed`]; both are logged. Bounded by
    /// [`LeaseLockConfig::release_timeout`].
    pub async fn release(&self, token: &LockToken) -> ReleaseOutcome {
        let key = token.resource_key.as_str();
        let release = self.backend.release(key, &token.holder);

        let outcome = match timeout(self.config.release_timeout, release).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(key, holder = %token.holder, error = %e, "Lock release failed, lease will lapse");
                ReleaseOutcome::StoreFailed
            }
            Err(_) => {
                tracing::warn!(
                    key,
                    holder = %token.holder,
                    timeout_ms = self.config.release_timeout.as_millis(),
                    "Lock release timed out, lease will lapse"
                );
                ReleaseOutcome::StoreFailed
            }
        };

        match outcome {
            ReleaseOutcome::NotHeld => {
                tracing::warn!(
                    key,
                    holder = %token.holder,
                    lease_expires_at = %token.lease_expires_at,
                    "Released a lock the caller no longer holds"
                );
            }
            ReleaseOutcome::Decremented { remaining_holds } => {
                tracing::debug!(key, holder = %token.holder, remaining_holds, "Lock hold released");
            }
            ReleaseOutcome::Freed => {
                tracing::debug!(key, holder = %token.holder, "Lock freed");
            }
            ReleaseOutcome::StoreFailed => {}
        }

        LeaseLockMetrics::record_release(outcome);
        outcome
    }

    /// Whether the token's holder still owns the key within its lease.
    ///
    /// Store errors read as `false`.
    pub async fn is_held_by_caller(&self, token: &LockToken) -> bool {
        let now = self.clock.now();
        if now >= token.lease_expires_at {
            return false;
        }

        match self.backend.inspect(&token.resource_key).await {
            Ok(Some(handle)) => handle.is_held_by(&token.holder, now),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    key = %token.resource_key,
                    holder = %token.holder,
                    error = %e,
                    "Could not verify lock ownership"
                );
                false
            }
        }
    }

    /// Current hold count of `key` for `chain`; 0 if someone else (or no
    /// one) holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached.
    pub async fn hold_count(&self, key: &str, chain: &CallChain) -> Result<u32, StoreError> {
        let holder = self.holder_for(chain);
        let now = self.clock.now();
        Ok(self
            .backend
            .inspect(key)
            .await?
            .filter(|handle| handle.is_held_by(&holder, now))
            .map_or(0, |handle| handle.hold_count))
    }
}

impl<B: LockBackend> Clone for LeaseLock<B> {
    fn clone(&self) -> Self {
        Self {
            instance: self.instance,
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl<B: LockBackend> std::fmt::Debug for LeaseLock<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLock")
            .field("instance", &self.instance)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
