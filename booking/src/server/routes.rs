//! Router configuration for the booking service.

use super::health::readiness_check;
use super::state::AppState;
use crate::api;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use courtside_web::handlers::health_check;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `/health`, `/ready`
/// - `/api/bookings`, `/api/courts/:id/quote`, `/api/payments`
/// - `/webhooks/:provider` (no actor, callbacks are signed)
/// - `/ws/bookings`
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/bookings", post(api::create_booking))
        .route("/bookings/:id", get(api::get_booking))
        .route("/bookings/:id/cancel", post(api::cancel_booking))
        .route("/courts/:id/quote", get(api::quote_price))
        .route("/payments", post(api::initiate_payment));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/webhooks/:provider", post(api::provider_webhook))
        .route("/ws/bookings", get(api::booking_updates))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(middleware::from_fn(courtside_web::correlation_id))
        .layer(TraceLayer::new_for_http())
}
