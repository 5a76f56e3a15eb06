//! Axum HTTP surface for Stockguard.
//!
//! # Routes
//!
//! | Method | Path                      | Handler                                  |
//! |--------|---------------------------|------------------------------------------|
//! | POST   | `/goods/order/:goods_id`  | [`order_goods`](handlers::order_goods)   |
//! | GET    | `/goods/:goods_id/stock`  | [`stock_level`](handlers::stock_level)   |
//! | GET    | `/orders/:order_id`       | [`order_status`](handlers::order_status) |
//! | GET    | `/health`                 | [`health_check`](handlers::health_check) |
//! | GET    | `/ready`                  | [`readiness`](handlers::readiness)       |
//! | GET    | `/metrics`                | [`render_metrics`](handlers::render_metrics) |
//!
//! The order endpoint answers `200` with `业务成功` or `业务失败`; everything
//! else is JSON, with failures rendered through [`AppError`].
//!
//! # Example
//!
//! ```ignore
//! use stockguard_web::{AppState, router};
//!
//! let app = router(AppState::new(coordinator).with_metrics(handle));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use stockguard_core::ledger::StockLedger;
use stockguard_core::lock::LockBackend;
use stockguard_core::order_log::OrderLog;
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{CorrelationId, IdempotencyKey, RequesterName};
pub use handlers::goods::{FAILURE_BODY, ORDER_ID_HEADER, OUTCOME_HEADER, SUCCESS_BODY};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
pub fn router<L, S, O>(state: AppState<L, S, O>) -> Router
where
    L: LockBackend + 'static,
    S: StockLedger + 'static,
    O: OrderLog + 'static,
{
    Router::new()
        .route("/goods/order/:goods_id", post(handlers::order_goods::<L, S, O>))
        .route("/goods/:goods_id/stock", get(handlers::stock_level::<L, S, O>))
        .route("/orders/:order_id", get(handlers::order_status::<L, S, O>))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness::<L, S, O>))
        .route("/metrics", get(handlers::render_metrics::<L, S, O>))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
