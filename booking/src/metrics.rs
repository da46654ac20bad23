//! Business metrics for the booking engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `courtside_bookings_total{outcome}` - Booking operations by outcome
//!   (created, paid, cancelled, purged, rejected)
//! - `courtside_slot_conflicts_total` - Requests refused because the slot was taken
//! - `courtside_payment_intents_total{status}` - Intents by status they reached
//! - `courtside_provider_errors_total{provider}` - Failed provider calls
//! - `courtside_serialization_retries_total` - Transactions re-run after a
//!   serialization failure
//! - `courtside_payment_revenue_minor_total` - Confirmed revenue in minor units
//!
//! ## Histograms
//! - `courtside_provider_call_duration_seconds{provider}` - Checkout creation latency

use crate::types::{IntentStatus, Money, ProviderKind};
use metrics::{describe_counter, describe_histogram};

/// Register metric descriptions.
///
/// Call once at start-up, before anything is recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "courtside_bookings_total",
        "Booking operations by outcome (created, paid, cancelled, purged, rejected)"
    );
    describe_counter!(
        "courtside_slot_conflicts_total",
        "Booking or payment requests refused because the slot was taken"
    );
    describe_counter!(
        "courtside_payment_intents_total",
        "Payment intents by the status they reached"
    );
    describe_counter!(
        "courtside_payment_revenue_minor_total",
        "Revenue from confirmed payments in minor currency units"
    );
    describe_counter!(
        "courtside_provider_errors_total",
        "Failed calls to payment providers"
    );
    describe_counter!(
        "courtside_serialization_retries_total",
        "Transactions re-run after a serialization failure"
    );
    describe_histogram!(
        "courtside_provider_call_duration_seconds",
        "Time spent creating a checkout at the provider"
    );

    tracing::info!("Business metrics registered");
}

/// Record the outcome of a booking operation.
pub fn record_booking(outcome: &'static str) {
    metrics::counter!("courtside_bookings_total", "outcome" => outcome).increment(1);
}

/// Record a refused slot.
pub fn record_slot_conflict() {
    metrics::counter!("courtside_slot_conflicts_total").increment(1);
}

/// Record an intent reaching `status`.
pub fn record_intent(status: IntentStatus) {
    metrics::counter!("courtside_payment_intents_total", "status" => status.as_str()).increment(1);
}

/// Record confirmed revenue.
pub fn record_revenue(amount: Money) {
    metrics::counter!("courtside_payment_revenue_minor_total").increment(amount.cents().unsigned_abs());
}

/// Record a provider call and its latency.
pub fn record_provider_call(provider: ProviderKind, duration_secs: f64, failed: bool) {
    metrics::histogram!("courtside_provider_call_duration_seconds", "provider" => provider.as_str())
        .record(duration_secs);
    if failed {
        metrics::counter!("courtside_provider_errors_total", "provider" => provider.as_str()).increment(1);
    }
    tracing::debug!(provider = %provider, duration_secs, failed, "Recorded provider call");
}

/// Record a transaction re-run.
pub fn record_serialization_retry() {
    metrics::counter!("courtside_serialization_retries_total").increment(1);
}
