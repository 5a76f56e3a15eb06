//! `PostgreSQL` stock ledger.

use crate::{Pool, store_error};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use stockguard_core::environment::{Clock, SystemClock};
use stockguard_core::error::LedgerError;
use stockguard_core::ledger::{DecrementOutcome, StockLedger};
use stockguard_core::types::{ItemId, StockDecrement, StockRecord};

/// Stock ledger over the `stock_records` and `stock_decrements` tables.
///
/// The decrement is one statement: a conditional `UPDATE ... WHERE quantity > 0`
/// whose returned row feeds the audit `INSERT` in the same CTE, so the
/// counter and the audit trail cannot disagree.
///
/// # Example
///
/// ```no_run
/// use stockguard_postgres::PostgresStockLedger;
/// use stockguard_core::ledger::StockLedger;
/// use stockguard_core::types::ItemId;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = PostgresStockLedger::new(pool);
/// ledger.set_quantity(&ItemId::new("42"), 100).await?;
/// let left = ledger.get_quantity(&ItemId::new("42")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresStockLedger {
    pool: Pool,
    clock: Arc<dyn Clock>,
}

impl PostgresStockLedger {
    /// Create a ledger over `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Pool::new(pool),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp writes with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn row_to_record(row: &PgRow) -> Result<StockRecord, LedgerError> {
        let item_id: String = row
            .try_get("item_id")
            .map_err(|e| store_error("Failed to read item_id", &e))?;
        Ok(StockRecord {
            item_id: ItemId::new(item_id),
            quantity: row
                .try_get("quantity")
                .map_err(|e| store_error("Failed to read quantity", &e))?,
            version: row
                .try_get("version")
                .map_err(|e| store_error("Failed to read version", &e))?,
        })
    }
}

impl std::fmt::Debug for PostgresStockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStockLedger").finish_non_exhaustive()
    }
}

impl StockLedger for PostgresStockLedger {
    async fn get_quantity(&self, item_id: &ItemId) -> Result<i64, LedgerError> {
        Ok(self
            .get_record(item_id)
            .await?
            .map_or(0, |record| record.quantity))
    }

    async fn get_record(&self, item_id: &ItemId) -> Result<Option<StockRecord>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(
            "SELECT item_id, quantity, version FROM stock_records WHERE item_id = $1",
        )
        .bind(item_id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| store_error("Failed to load stock record", &e))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn decrement_if_positive(&self, item_id: &ItemId) -> Result<DecrementOutcome, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<(i64, i64)> = sqlx::query_as(
            r"
            WITH updated AS (
                UPDATE stock_records
                SET quantity = quantity - 1, version = version + 1, updated_at = $2
                WHERE item_id = $1 AND quantity > 0
                RETURNING item_id, quantity, version
            )
            INSERT INTO stock_decrements (item_id, new_quantity, version, decremented_at)
            SELECT item_id, quantity, version, $2 FROM updated
            RETURNING new_quantity, version
            ",
        )
        .bind(item_id.as_str())
        .bind(self.clock.now())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| store_error("Failed to decrement stock", &e))?;

        let outcome = match row {
            Some((new_quantity, version)) => {
                tracing::debug!(item_id = %item_id, new_quantity, version, "Stock decremented");
                DecrementOutcome::Decremented {
                    new_quantity,
                    version,
                }
            }
            None => {
                tracing::debug!(item_id = %item_id, "Stock exhausted");
                DecrementOutcome::Exhausted
            }
        };

        let result = match outcome {
            DecrementOutcome::Decremented { .. } => "decremented",
            DecrementOutcome::Exhausted => "exhausted",
        };
        metrics::counter!("stock_decrements_total", "result" => result).increment(1);

        Ok(outcome)
    }

    async fn restore(&self, item_id: &ItemId) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<(i64,)> = sqlx::query_as(
            r"
            UPDATE stock_records
            SET quantity = quantity + 1, version = version + 1, updated_at = $2
            WHERE item_id = $1
            RETURNING quantity
            ",
        )
        .bind(item_id.as_str())
        .bind(self.clock.now())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| store_error("Failed to restore stock", &e))?;

        let (quantity,) = row.ok_or_else(|| LedgerError::UnknownItem(item_id.clone()))?;
        tracing::info!(item_id = %item_id, quantity, "Stock unit restored");
        Ok(quantity)
    }

    async fn set_quantity(&self, item_id: &ItemId, quantity: i64) -> Result<StockRecord, LedgerError> {
        if quantity < 0 {
            return Err(LedgerError::InvalidQuantity {
                item_id: item_id.clone(),
                quantity,
            });
        }

        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(
            r"
            INSERT INTO stock_records (item_id, quantity, version, updated_at)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (item_id) DO UPDATE
            SET quantity = EXCLUDED.quantity,
                version = stock_records.version + 1,
                updated_at = EXCLUDED.updated_at
            RETURNING item_id, quantity, version
            ",
        )
        .bind(item_id.as_str())
        .bind(quantity)
        .bind(self.clock.now())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| store_error("Failed to set stock quantity", &e))?;

        let record = Self::row_to_record(&row)?;
        tracing::info!(item_id = %item_id, quantity, version = record.version, "Stock quantity set");
        Ok(record)
    }

    async fn audit_trail(&self, item_id: &ItemId) -> Result<Vec<StockDecrement>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<(i64, i64, DateTime<Utc>)> = sqlx::query_as(
            r"
            SELECT new_quantity, version, decremented_at
            FROM stock_decrements
            WHERE item_id = $1
            ORDER BY id ASC
            ",
        )
        .bind(item_id.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| store_error("Failed to load stock audit trail", &e))?;

        Ok(rows
            .into_iter()
            .map(|(new_quantity, version, at)| StockDecrement {
                item_id: item_id.clone(),
                new_quantity,
                version,
                at,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.pool.ping().await.map_err(LedgerError::from)
    }
}

