//! HTTP request handlers.

pub mod goods;
pub mod health;
pub mod orders;

pub use goods::{order_goods, stock_level};
pub use health::{health_check, readiness, render_metrics};
pub use orders::order_status;
