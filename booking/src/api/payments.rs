//! Payment initiation.
//!
//! `POST /api/payments` accepts either an existing booking or a slot:
//!
//! ```json
//! { "bookingId": "…", "paymentProvider": "wayforpay" }
//! { "clubId": "…", "courtId": "…", "startAt": "…", "endAt": "…", "paymentProvider": "stripe" }
//! ```
//!
//! The payment account is always resolved server-side; callers cannot pick it.

use crate::payments::{PaymentCheckout, SlotPayment};
use crate::server::state::AppState;
use crate::types::{BookingId, ClubId, CourtId, ProviderKind};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Utc};
use courtside_web::{Actor, AppError};
use serde::Deserialize;

/// Payment initiation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    /// Existing booking to pay
    pub booking_id: Option<BookingId>,
    /// Club of the slot
    pub club_id: Option<ClubId>,
    /// Court of the slot
    pub court_id: Option<CourtId>,
    /// Slot start
    pub start_at: Option<DateTime<Utc>>,
    /// Slot end
    pub end_at: Option<DateTime<Utc>>,
    /// Provider to pay through
    pub payment_provider: ProviderKind,
}

/// What to pay for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Booking(BookingId),
    Slot(SlotPayment),
}

impl InitiatePaymentRequest {
    fn target(&self) -> Result<Target, AppError> {
        if let Some(booking_id) = self.booking_id {
            return Ok(Target::Booking(booking_id));
        }
        match (self.club_id, self.court_id, self.start_at, self.end_at) {
            (Some(club_id), Some(court_id), Some(start_at), Some(end_at)) => Ok(Target::Slot(SlotPayment {
                club_id,
                court_id,
                start_at,
                end_at,
            })),
            _ => Err(AppError::bad_request(
                "Provide bookingId, or clubId, courtId, startAt and endAt",
            )
            .with_code("VALIDATION_ERROR")),
        }
    }
}

/// Start a hosted checkout.
///
/// # Errors
///
/// `400` bad input or finalized booking, `403` booking of another user,
/// `404` unknown booking or court, `409` slot taken or payment unavailable,
/// `500` provider failure.
#[tracing::instrument(skip(state, actor, payload), fields(user_id = %actor.user_id))]
pub async fn initiate_payment(
    actor: Actor,
    State(state): State<AppState>,
    payload: Result<Json<InitiatePaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentCheckout>, AppError> {
    let Json(request) = payload?;
    let provider = request.payment_provider;
    let checkout = match request.target()? {
        Target::Booking(booking_id) => state.payments.initiate(&actor, booking_id, provider).await?,
        Target::Slot(slot) => state.payments.initiate_for_slot(&actor, slot, provider).await?,
    };
    Ok(Json(checkout))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(body: serde_json::Value) -> InitiatePaymentRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn booking_id_wins_over_slot_fields() {
        let booking_id = BookingId::new();
        let request = parse(serde_json::json!({
            "bookingId": booking_id,
            "courtId": CourtId::new(),
            "paymentProvider": "stripe",
        }));
        assert_eq!(request.target().unwrap(), Target::Booking(booking_id));
    }

    #[test]
    fn incomplete_slot_is_rejected() {
        let request = parse(serde_json::json!({
            "clubId": ClubId::new(),
            "courtId": CourtId::new(),
            "startAt": "2025-03-10T10:00:00Z",
            "paymentProvider": "wayforpay",
        }));
        let err = request.target().unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn account_id_from_caller_is_ignored() {
        let request = parse(serde_json::json!({
            "bookingId": BookingId::new(),
            "paymentAccountId": "acct_attacker",
            "paymentProvider": "wayforpay",
        }));
        assert!(matches!(request.target().unwrap(), Target::Booking(_)));
    }
}
