//! Readiness of the booking service.
//!
//! Liveness (`GET /health`) comes from `courtside_web` as is. Readiness
//! (`GET /ready`) pings the booking store.

use super::state::AppState;
use crate::store::BookingStore;
use axum::{extract::State, http::StatusCode, Json};
use courtside_web::handlers::{readiness, ReadinessProbe, ReadinessReport};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Probe answering whether the booking store accepts transactions.
#[derive(Clone)]
pub struct StoreProbe {
    store: Arc<dyn BookingStore>,
}

impl StoreProbe {
    /// Probe for `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }
}

impl ReadinessProbe for StoreProbe {
    fn name(&self) -> &'static str {
        "booking_store"
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
        Box::pin(async move { self.store.ping().await.map_err(|e| e.to_string()) })
    }
}

/// Readiness endpoint.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/ready
/// # {"status":"ready","components":[{"component":"booking_store","status":"up"}]}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    readiness(&state.probes).await
}
