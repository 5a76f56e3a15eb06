//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's correlation ID
//! - [`IdempotencyKey`]: optional caller-chosen order id
//! - [`RequesterName`]: who is asking, from `X-Requester`
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     correlation_id: CorrelationId,
//!     IdempotencyKey(order_id): IdempotencyKey,
//!     RequesterName(requester): RequesterName,
//! ) -> impl IntoResponse {
//!     tracing::info!(correlation_id = %correlation_id.0, requester = %requester, "Order received");
//! }
//! ```

use crate::error::AppError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use stockguard_core::types::{OrderId, Requester};
use uuid::Uuid;

/// Header carrying a caller-chosen order id.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Header naming the requester.
pub const REQUESTER_HEADER: &str = "X-Requester";

/// Requester used when `X-Requester` is absent or blank.
pub const ANONYMOUS_REQUESTER: &str = "anonymous";

/// Correlation ID for request tracing.
///
/// Taken from the request extensions when the correlation middleware ran,
/// otherwise from the `X-Correlation-ID` header, otherwise freshly generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Read the ID from headers, or generate one.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self(
            headers
                .get(crate::middleware::CORRELATION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok())
                .unwrap_or_else(Uuid::new_v4),
        )
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Self>()
            .copied()
            .unwrap_or_else(|| Self::from_headers(&parts.headers)))
    }
}

/// Optional order id supplied in `Idempotency-Key`.
///
/// Retrying a request with the same key replays the recorded outcome
/// instead of reserving a second unit.
///
/// # Rejection
///
/// 400 Bad Request if the header is present but not a UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyKey(pub Option<OrderId>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(Self(None));
        };

        let uuid = value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or_else(|| AppError::bad_request("Idempotency-Key must be a UUID"))?;

        Ok(Self(Some(OrderId::from_uuid(uuid))))
    }
}

/// Requester named by `X-Requester`, or [`ANONYMOUS_REQUESTER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterName(pub Requester);

#[async_trait]
impl<S> FromRequestParts<S> for RequesterName
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let name = parts
            .headers
            .get(REQUESTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(ANONYMOUS_REQUESTER);

        Ok(Self(Requester::new(name)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn request_parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/goods/order/42");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_idempotency_key_absent() {
        let mut parts = request_parts(&[]);
        let key = IdempotencyKey::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(key, IdempotencyKey(None));
    }

    #[tokio::test]
    async fn test_idempotency_key_parsed() {
        let uuid = Uuid::new_v4();
        let mut parts = request_parts(&[(IDEMPOTENCY_KEY_HEADER, &uuid.to_string())]);
        let key = IdempotencyKey::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(key, IdempotencyKey(Some(OrderId::from_uuid(uuid))));
    }

    #[tokio::test]
    async fn test_idempotency_key_malformed() {
        let mut parts = request_parts(&[(IDEMPOTENCY_KEY_HEADER, "order-1")]);
        let err = IdempotencyKey::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_requester_defaults_to_anonymous() {
        let mut parts = request_parts(&[(REQUESTER_HEADER, "   ")]);
        let RequesterName(requester) = RequesterName::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(requester.as_str(), ANONYMOUS_REQUESTER);

        let mut parts = request_parts(&[(REQUESTER_HEADER, "alice")]);
        let RequesterName(requester) = RequesterName::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(requester.as_str(), "alice");
    }

    #[tokio::test]
    async fn test_correlation_id_prefers_extension() {
        let mut parts = request_parts(&[]);
        let id = CorrelationId(Uuid::new_v4());
        parts.extensions.insert(id);

        let extracted = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(extracted, id);
    }
}
