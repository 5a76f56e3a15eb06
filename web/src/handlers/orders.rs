//! Order lookup.

use crate::WebResult;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use stockguard_core::ledger::StockLedger;
use stockguard_core::lock::LockBackend;
use stockguard_core::order_log::OrderLog;
use stockguard_core::types::{OrderId, OrderRecord};
use uuid::Uuid;

/// Look up an order by id.
///
/// ```text
/// GET /orders/:order_id
/// ```
///
/// # Errors
///
/// 400 if the id is not a UUID, 404 if unknown, 503 if the order log is
/// unreachable.
pub async fn order_status<L, S, O>(
    State(state): State<AppState<L, S, O>>,
    Path(order_id): Path<String>,
) -> WebResult<Json<OrderRecord>>
where
    L: LockBackend + 'static,
    S: StockLedger + 'static,
    O: OrderLog + 'static,
{
    let order_id = Uuid::parse_str(&order_id)
        .map(OrderId::from_uuid)
        .map_err(|_| AppError::bad_request("Order id must be a UUID"))?;

    state
        .coordinator
        .orders()
        .get(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Order", order_id))
}
