//! Goods endpoints: the order endpoint and the stock query.

use crate::WebResult;
use crate::error::AppError;
use crate::extractors::{CorrelationId, IdempotencyKey, RequesterName};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use stockguard_core::error::Outcome;
use stockguard_core::ledger::StockLedger;
use stockguard_core::lock::LockBackend;
use stockguard_core::order_log::OrderLog;
use stockguard_core::types::{ItemId, OrderId, StockRecord};
use stockguard_runtime::ReservationRequest;

/// Body returned when a unit was reserved.
pub const SUCCESS_BODY: &str = "业务成功";

/// Body returned for every rejection.
pub const FAILURE_BODY: &str = "业务失败";

/// Response header carrying the order id.
pub const ORDER_ID_HEADER: &str = "x-order-id";

/// Response header carrying the outcome class.
pub const OUTCOME_HEADER: &str = "x-reservation-outcome";

/// Reserve one unit of `goods_id`.
///
/// # Endpoint
///
/// ```text
/// POST /goods/order/:goods_id
/// Idempotency-Key: <uuid>     (optional)
/// X-Requester: <name>         (optional)
/// ```
///
/// # Response
///
/// Always `200 OK` with a plain body, `业务成功` or `业务失败`. The
/// `X-Reservation-Outcome` header tells business rejections
/// (`rejected-business`) apart from retryable ones (`rejected-system`).
///
/// A malformed `Idempotency-Key` is rejected with 400 before any store is
/// touched.
pub async fn order_goods<L, S, O>(
    State(state): State<AppState<L, S, O>>,
    Path(goods_id): Path<String>,
    correlation_id: CorrelationId,
    IdempotencyKey(order_id): IdempotencyKey,
    RequesterName(requester): RequesterName,
) -> Response
where
    L: LockBackend + 'static,
    S: StockLedger + 'static,
    O: OrderLog + 'static,
{
    let mut request = ReservationRequest::new(ItemId::new(goods_id), requester);
    if let Some(order_id) = order_id {
        request = request.with_order_id(order_id);
    }

    // The coordinator finishes lock release and order bookkeeping on its own
    // task, so a client disconnect here cannot strand the item lock.
    match state.coordinator.reserve(request).await {
        Ok(receipt) => reservation_response(Outcome::Accepted, receipt.order_id),
        Err(e) => {
            tracing::debug!(
                correlation_id = %correlation_id.0,
                error = %e,
                retryable = e.is_retryable(),
                "Reservation rejected"
            );
            reservation_response(e.outcome(), e.order_id())
        }
    }
}

fn reservation_response(outcome: Outcome, order_id: OrderId) -> Response {
    let body = match outcome {
        Outcome::Accepted => SUCCESS_BODY,
        Outcome::RejectedBusiness | Outcome::RejectedSystem => FAILURE_BODY,
    };

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(OUTCOME_HEADER, HeaderValue::from_static(outcome.as_str()));
    if let Ok(value) = HeaderValue::from_str(&order_id.to_string()) {
        headers.insert(ORDER_ID_HEADER, value);
    }
    response
}

/// Current stock of `goods_id`.
///
/// ```text
/// GET /goods/:goods_id/stock
/// ```
///
/// # Errors
///
/// 404 if the item has no stock record; 503 if the ledger is unreachable.
pub async fn stock_level<L, S, O>(
    State(state): State<AppState<L, S, O>>,
    Path(goods_id): Path<String>,
) -> WebResult<Json<StockRecord>>
where
    L: LockBackend + 'static,
    S: StockLedger + 'static,
    O: OrderLog + 'static,
{
    let item_id = ItemId::new(goods_id);
    state
        .coordinator
        .ledger()
        .get_record(&item_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Item", item_id))
}
