//! `PostgreSQL` order log.

use crate::{Pool, store_error};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use stockguard_core::environment::{Clock, SystemClock};
use stockguard_core::error::{OrderLogError, StoreError};
use stockguard_core::order_log::OrderLog;
use stockguard_core::types::{
    FailureReason, ItemId, OrderId, OrderRecord, OrderStatus, Requester,
};
use uuid::Uuid;

/// Order log over the `order_records` table.
///
/// Status transitions only touch rows that are still `pending`; on a terminal
/// row the stored status is read back and returned unchanged.
#[derive(Clone)]
pub struct PostgresOrderLog {
    pool: Pool,
    clock: Arc<dyn Clock>,
}

impl PostgresOrderLog {
    /// Create an order log over `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Pool::new(pool),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp transitions with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn row_to_record(row: &PgRow) -> Result<OrderRecord, StoreError> {
        let read =
            |column: &str, e: &sqlx::Error| store_error(&format!("Failed to read {column}"), e);

        let order_id: Uuid = row.try_get("order_id").map_err(|e| read("order_id", &e))?;
        let item_id: String = row.try_get("item_id").map_err(|e| read("item_id", &e))?;
        let requester: String = row.try_get("requester").map_err(|e| read("requester", &e))?;
        let status: String = row.try_get("status").map_err(|e| read("status", &e))?;
        let failure_reason: Option<String> = row
            .try_get("failure_reason")
            .map_err(|e| read("failure_reason", &e))?;
        let created_at: DateTime<Utc> =
            row.try_get("created_at").map_err(|e| read("created_at", &e))?;
        let updated_at: DateTime<Utc> =
            row.try_get("updated_at").map_err(|e| read("updated_at", &e))?;

        Ok(OrderRecord {
            order_id: OrderId::from_uuid(order_id),
            item_id: ItemId::new(item_id),
            requester: Requester::new(requester),
            created_at,
            updated_at,
            status: OrderStatus::parse(&status)?,
            failure_reason: failure_reason
                .as_deref()
                .map(FailureReason::parse)
                .transpose()?,
        })
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<OrderRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(
            r"
            SELECT order_id, item_id, requester, status, failure_reason, created_at, updated_at
            FROM order_records
            WHERE order_id = $1
            ",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| store_error("Failed to load order", &e))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn transition(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        reason: Option<FailureReason>,
    ) -> Result<OrderStatus, OrderLogError> {
        let mut conn = self.pool.acquire().await?;
        let updated = sqlx::query(
            r"
            UPDATE order_records
            SET status = $2, failure_reason = $3, updated_at = $4
            WHERE order_id = $1 AND status = 'pending'
            ",
        )
        .bind(order_id.as_uuid())
        .bind(status.as_str())
        .bind(reason.as_ref().map(FailureReason::as_str))
        .bind(self.clock.now())
        .execute(&mut *conn)
        .await
        .map_err(|e| store_error("Failed to update order status", &e))?;
        drop(conn);

        if updated.rows_affected() == 1 {
            tracing::debug!(order_id = %order_id, status = %status, "Order status updated");
            return Ok(status);
        }

        // Already terminal, or missing.
        let existing = self
            .load(order_id)
            .await?
            .ok_or(OrderLogError::NotFound(order_id))?;
        tracing::debug!(
            order_id = %order_id,
            requested = %status,
            existing = %existing.status,
            "Order already terminal"
        );
        Ok(existing.status)
    }
}

impl std::fmt::Debug for PostgresOrderLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresOrderLog").finish_non_exhaustive()
    }
}

impl OrderLog for PostgresOrderLog {
    async fn append_pending(&self, order: &OrderRecord) -> Result<(), OrderLogError> {
        let mut conn = self.pool.acquire().await?;
        let inserted = sqlx::query(
            r"
            INSERT INTO order_records (
                order_id, item_id, requester, status, failure_reason, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (order_id) DO NOTHING
            ",
        )
        .bind(order.order_id.as_uuid())
        .bind(order.item_id.as_str())
        .bind(order.requester.as_str())
        .bind(order.status.as_str())
        .bind(order.failure_reason.as_ref().map(FailureReason::as_str))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| store_error("Failed to insert order", &e))?;
        drop(conn);

        if inserted.rows_affected() == 1 {
            return Ok(());
        }

        let existing = self.load(order.order_id).await?.ok_or_else(|| {
            StoreError::Unavailable(format!(
                "order {} conflicted but could not be read back",
                order.order_id
            ))
        })?;
        Err(OrderLogError::DuplicateOrder {
            existing: Box::new(existing),
        })
    }

    async fn mark_confirmed(&self, order_id: OrderId) -> Result<OrderStatus, OrderLogError> {
        self.transition(order_id, OrderStatus::Confirmed, None).await
    }

    async fn mark_failed(
        &self,
        order_id: OrderId,
        reason: FailureReason,
    ) -> Result<OrderStatus, OrderLogError> {
        self.transition(order_id, OrderStatus::Failed, Some(reason))
            .await
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<OrderRecord>, OrderLogError> {
        Ok(self.load(order_id).await?)
    }

    async fn ping(&self) -> Result<(), OrderLogError> {
        Ok(self.pool.ping().await?)
    }
}
