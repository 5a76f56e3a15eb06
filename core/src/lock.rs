//! Lock store trait.
//!
//! A [`LockBackend`] grants named, lease-bounded, reentrant locks with one
//! atomic store operation per call. The waiting, backoff and release
//! bookkeeping live in `LeaseLock` (stockguard-runtime); the backend only
//! answers "can this holder have the key right now?".
//!
//! # Grant rules
//!
//! | Key state                         | Result                                        |
//! |-----------------------------------|-----------------------------------------------|
//! | free, or lease expired            | [`GrantOutcome::Acquired`], count 1, new lease |
//! | held by the same holder           | [`GrantOutcome::Reentered`], count + 1, lease unchanged |
//! | held by another holder            | [`GrantOutcome::Busy`]                         |

use crate::error::StoreError;
use crate::types::{HolderId, LockHandle};
use std::future::Future;
use std::time::Duration;

/// Result of a single grant attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// The key was free; the holder now owns it with a fresh lease.
    Acquired(LockHandle),
    /// The holder already owned the key; its hold count went up.
    Reentered(LockHandle),
    /// Another holder owns the key.
    Busy {
        /// Current owner
        holder: HolderId,
        /// Lease time the owner has left
        remaining: Duration,
    },
}

/// Result of a single release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The holder still has outstanding acquisitions.
    Decremented {
        /// Hold count after the release
        remaining_holds: u32,
    },
    /// The last hold was released and the key deleted.
    Freed,
    /// The holder did not own the key (lease expired or reassigned).
    NotHeld,
    /// The store could not be reached; the lease will lapse on its own.
    StoreFailed,
}

/// Atomic lease-lock store.
///
/// # Example
///
/// ```no_run
/// use stockguard_core::lock::{GrantOutcome, LockBackend};
/// use stockguard_core::types::{CallChain, HolderId};
/// use std::time::Duration;
///
/// # async fn example(backend: impl LockBackend) -> Result<(), Box<dyn std::error::Error>> {
/// let holder = HolderId::new(uuid::Uuid::new_v4(), CallChain::new());
/// match backend.try_grant("42", &holder, Duration::from_secs(25)).await? {
///     GrantOutcome::Acquired(handle) | GrantOutcome::Reentered(handle) => {
///         assert!(handle.hold_count >= 1);
///         backend.release("42", &holder).await?;
///     }
///     GrantOutcome::Busy { .. } => {}
/// }
/// # Ok(())
/// # }
/// ```
pub trait LockBackend: Send + Sync {
    /// Try to grant `key` to `holder` once, without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached or returns
    /// malformed data.
    fn try_grant(
        &self,
        key: &str,
        holder: &HolderId,
        lease: Duration,
    ) -> impl Future<Output = Result<GrantOutcome, StoreError>> + Send;

    /// Drop one hold of `key` by `holder`, deleting the key at zero.
    ///
    /// Never returns [`ReleaseOutcome::StoreFailed`]; that variant is produced
    /// by callers that swallow the error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached.
    fn release(
        &self,
        key: &str,
        holder: &HolderId,
    ) -> impl Future<Output = Result<ReleaseOutcome, StoreError>> + Send;

    /// Read the current state of `key`. Expired leases read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached or returns
    /// malformed data.
    fn inspect(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<LockHandle>, StoreError>> + Send;

    /// Check connectivity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot be reached.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
