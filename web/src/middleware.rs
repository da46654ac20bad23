//! Request correlation middleware.
//!
//! Every request gets a correlation id, taken from the `X-Correlation-ID`
//! header when the caller supplied a valid UUID, otherwise freshly generated.
//! The id is stored in request extensions (so the [`CorrelationId`]
//! extractor can read it), recorded on the request's tracing span, and echoed
//! back on the response.
//!
//! # Example
//!
//! ```ignore
//! use axum::{middleware::from_fn, Router};
//! use courtside_web::middleware::correlation_id;
//!
//! let app = Router::new()
//!     .route("/api/bookings", post(create_booking))
//!     .layer(from_fn(correlation_id));
//! ```

use crate::extractors::CorrelationId;
use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Read the caller's correlation id, if it is a valid UUID.
pub(crate) fn from_headers(headers: &axum::http::HeaderMap) -> Option<Uuid> {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Middleware function attaching a correlation id to the request and response.
pub async fn correlation_id(mut req: Request, next: Next) -> Response {
    let id = from_headers(req.headers()).unwrap_or_else(Uuid::new_v4);
    req.extensions_mut().insert(CorrelationId(id));

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %id,
        method = %req.method(),
        uri = %req.uri(),
    );

    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    response
}
