//! `PostgreSQL` stock ledger and order log for Stockguard.
//!
//! This crate provides the relational half of the reservation stores:
//!
//! - [`PostgresStockLedger`]: stock counters with a single-statement
//!   conditional decrement and its audit trail
//! - [`PostgresOrderLog`]: order records keyed by order id, with
//!   `ON CONFLICT DO NOTHING` duplicate detection
//! - [`MIGRATOR`]: embedded schema migrations
//!
//! Only acquiring a pooled connection is retried. A statement that may have
//! reached the server is never sent twice.
//!
//! # Example
//!
//! ```ignore
//! use stockguard_postgres::{PostgresOrderLog, PostgresStockLedger, connect, run_migrations};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("postgres://localhost/stockguard", 10, Duration::from_secs(5)).await?;
//!     run_migrations(&pool).await?;
//!     let ledger = PostgresStockLedger::new(pool.clone());
//!     let orders = PostgresOrderLog::new(pool);
//!     Ok(())
//! }
//! ```

use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use stockguard_core::error::StoreError;
use stockguard_runtime::retry::{RetryPolicy, retry_with_predicate};

mod ledger;
mod order_log;

pub use ledger::PostgresStockLedger;
pub use order_log::PostgresOrderLog;

/// Embedded schema migrations (`stock_records`, `stock_decrements`, `order_records`).
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the database cannot be reached.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    connect_timeout: Duration,
) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(database_url)
        .await
        .map_err(|e| store_error("Failed to connect to database", &e))
}

/// Apply pending migrations.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to run migrations: {e}")))?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Map a sqlx error to the store taxonomy.
pub(crate) fn store_error(context: &str, e: &sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(format!("{context}: {e}")),
        _ => StoreError::Unavailable(format!("{context}: {e}")),
    }
}

fn is_transient_acquire(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_)
    )
}

/// Pool plus the backoff used to check out connections.
#[derive(Debug, Clone)]
pub(crate) struct Pool {
    pool: PgPool,
    acquire_retry: RetryPolicy,
}

impl Pool {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self {
            pool,
            acquire_retry: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_millis(500))
                .build(),
        }
    }

    /// Check out a connection, retrying transient pool failures.
    pub(crate) async fn acquire(&self) -> Result<PoolConnection<Postgres>, StoreError> {
        retry_with_predicate(
            self.acquire_retry.clone(),
            || self.pool.acquire(),
            is_transient_acquire,
        )
        .await
        .map_err(|e| store_error("Failed to acquire connection", &e))
    }

    pub(crate) async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.acquire().await?;
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(|e| store_error("Database ping failed", &e))?;
        Ok(())
    }
}
