//! Application state for the booking HTTP server.

use crate::engine::BookingEngine;
use crate::notifier::BroadcastNotifier;
use crate::payments::PaymentOrchestrator;
use axum::extract::FromRef;
use courtside_web::handlers::ReadinessProbe;
use courtside_web::ActorResolver;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Booking engine
    pub engine: BookingEngine,

    /// Payment orchestration over the same engine
    pub payments: PaymentOrchestrator,

    /// Broadcaster feeding the realtime endpoint
    pub notifier: BroadcastNotifier,

    /// Resolves the caller from request headers
    pub actors: Arc<dyn ActorResolver>,

    /// Dependencies checked by `/ready`
    pub probes: Arc<[Arc<dyn ReadinessProbe>]>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        engine: BookingEngine,
        payments: PaymentOrchestrator,
        notifier: BroadcastNotifier,
        actors: Arc<dyn ActorResolver>,
        probes: Vec<Arc<dyn ReadinessProbe>>,
    ) -> Self {
        Self {
            engine,
            payments,
            notifier,
            actors,
            probes: probes.into(),
        }
    }
}

// Lets the `Actor` extractor find the resolver
impl FromRef<AppState> for Arc<dyn ActorResolver> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.actors)
    }
}
