//! `Redis` lock backend for Stockguard.
//!
//! Implements [`LockBackend`] with one Lua script per operation, so each
//! grant and release is a single atomic step on the server.
//!
//! # Layout
//!
//! One hash per locked resource:
//!
//! ```text
//! stockguard:lock:{key}   HASH   { "{instance}:{chain}" => hold count }
//!                         PEXPIRE lease
//! ```
//!
//! The TTL is set only when the hash is created. A reentrant grant bumps the
//! count and leaves the TTL alone, so leases are never extended. When the
//! count drops to zero the key is deleted; if the holder dies, the TTL removes
//! it.
//!
//! # Lease deadlines
//!
//! Deadlines handed back in [`LockHandle`]s are computed from the local
//! [`Clock`] read *before* the command was sent plus the TTL the server
//! reported, so they never run later than the server-side expiry.
//!
//! The server-side lease is unchanged by a reentrant grant, but the deadline
//! in its handle is re-derived from the remaining TTL. It can come out a few
//! milliseconds earlier than the deadline of the first grant; it is never
//! later than the key's actual expiry.
//!
//! # Example
//!
//! ```no_run
//! use stockguard_redis::RedisLockBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = RedisLockBackend::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stockguard_core::environment::{Clock, SystemClock};
use stockguard_core::error::StoreError;
use stockguard_core::lock::{GrantOutcome, LockBackend, ReleaseOutcome};
use stockguard_core::types::{HolderId, LockHandle};

/// Default prefix of lock keys.
pub const DEFAULT_KEY_PREFIX: &str = "stockguard:lock:";

// Returns {kind, count, pttl, owner}: kind 1 = acquired, 2 = reentered, 0 = busy.
const GRANT_SCRIPT: &str = r"
    local key = KEYS[1]
    local holder = ARGV[1]
    local lease = tonumber(ARGV[2])

    if redis.call('EXISTS', key) == 0 then
        redis.call('HSET', key, holder, 1)
        redis.call('PEXPIRE', key, lease)
        return {1, 1, lease, holder}
    end

    if redis.call('HEXISTS', key, holder) == 1 then
        local count = redis.call('HINCRBY', key, holder, 1)
        return {2, count, redis.call('PTTL', key), holder}
    end

    local owner = redis.call('HKEYS', key)[1]
    return {0, 0, redis.call('PTTL', key), owner}
";

// Returns -1 if not held, otherwise the remaining count (0 = deleted).
const RELEASE_SCRIPT: &str = r"
    local key = KEYS[1]
    local holder = ARGV[1]

    if redis.call('HEXISTS', key, holder) == 0 then
        return -1
    end

    local count = redis.call('HINCRBY', key, holder, -1)
    if count > 0 then
        return count
    end

    redis.call('DEL', key)
    return 0
";

fn store_error(context: &str, e: &RedisError) -> StoreError {
    if e.kind() == redis::ErrorKind::TypeError {
        StoreError::Corrupt(format!("{context}: {e}"))
    } else {
        StoreError::Unavailable(format!("{context}: {e}"))
    }
}

fn millis(ttl: i64) -> Duration {
    Duration::from_millis(u64::try_from(ttl).unwrap_or(0))
}

fn deadline(now: DateTime<Utc>, ttl_ms: i64) -> DateTime<Utc> {
    now + TimeDelta::milliseconds(ttl_ms.max(0))
}

fn hold_count(count: i64) -> Result<u32, StoreError> {
    u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("invalid hold count {count}")))
}

/// `Redis`-backed [`LockBackend`].
#[derive(Clone)]
pub struct RedisLockBackend {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    key_prefix: String,
    clock: Arc<dyn Clock>,
    grant: Script,
    release: Script,
}

impl RedisLockBackend {
    /// Connect to `Redis`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| store_error("Failed to create Redis client", &e))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| store_error("Failed to create Redis connection manager", &e))?;

        Ok(Self::from_manager(conn_manager))
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            clock: Arc::new(SystemClock),
            grant: Script::new(GRANT_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Use a different key prefix (e.g. one per test).
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Compute lease deadlines with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

impl std::fmt::Debug for RedisLockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockBackend")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl LockBackend for RedisLockBackend {
    async fn try_grant(
        &self,
        key: &str,
        holder: &HolderId,
        lease: Duration,
    ) -> Result<GrantOutcome, StoreError> {
        let mut conn = self.conn_manager.clone();
        let lock_key = self.lock_key(key);
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX);
        let now = self.clock.now();

        let (kind, count, ttl_ms, owner): (i64, i64, i64, String) = self
            .grant
            .key(&lock_key)
            .arg(holder.to_string())
            .arg(lease_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("Failed to run lock grant script", &e))?;

        let handle = || -> Result<LockHandle, StoreError> {
            Ok(LockHandle {
                resource_key: key.to_string(),
                holder_id: *holder,
                hold_count: hold_count(count)?,
                lease_expires_at: deadline(now, ttl_ms),
            })
        };

        match kind {
            1 => Ok(GrantOutcome::Acquired(handle()?)),
            2 => Ok(GrantOutcome::Reentered(handle()?)),
            0 => Ok(GrantOutcome::Busy {
                holder: HolderId::parse(&owner)?,
                remaining: millis(ttl_ms),
            }),
            other => Err(StoreError::Corrupt(format!(
                "unexpected lock grant result {other} for {lock_key}"
            ))),
        }
    }

    async fn release(&self, key: &str, holder: &HolderId) -> Result<ReleaseOutcome, StoreError> {
        let mut conn = self.conn_manager.clone();
        let lock_key = self.lock_key(key);

        let remaining: i64 = self
            .release
            .key(&lock_key)
            .arg(holder.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("Failed to run lock release script", &e))?;

        match remaining {
            -1 => Ok(ReleaseOutcome::NotHeld),
            0 => Ok(ReleaseOutcome::Freed),
            n => Ok(ReleaseOutcome::Decremented {
                remaining_holds: hold_count(n)?,
            }),
        }
    }

    async fn inspect(&self, key: &str) -> Result<Option<LockHandle>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let lock_key = self.lock_key(key);
        let now = self.clock.now();

        let (holders, ttl_ms): (HashMap<String, i64>, i64) = redis::pipe()
            .atomic()
            .hgetall(&lock_key)
            .pttl(&lock_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("Failed to inspect lock", &e))?;

        let Some((holder, count)) = holders.into_iter().next() else {
            return Ok(None);
        };
        if ttl_ms < 0 {
            // -2: expired between the two reads; -1: no lease, never written by us
            tracing::warn!(key = %lock_key, ttl_ms, "Lock entry without a lease");
            return Ok(None);
        }

        Ok(Some(LockHandle {
            resource_key: key.to_string(),
            holder_id: HolderId::parse(&holder)?,
            hold_count: hold_count(count)?,
            lease_expires_at: deadline(now, ttl_ms),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("Redis ping failed", &e))?;
        Ok(())
    }
}
