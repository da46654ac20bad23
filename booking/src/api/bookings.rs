//! Booking endpoints.
//!
//! - `POST /api/bookings`: reserve a slot, `201` with the held booking
//! - `GET /api/bookings/:id`: status polling, `404` unless owner or club staff
//! - `POST /api/bookings/:id/cancel`: cancel, owner or club staff only
//!
//! # Example
//!
//! ```bash
//! curl -X POST http://localhost:8080/api/bookings \
//!   -H "X-Actor-Id: 770e8400-e29b-41d4-a716-446655440002" \
//!   -H "Content-Type: application/json" \
//!   -d '{
//!     "courtId": "550e8400-e29b-41d4-a716-446655440000",
//!     "userId": "770e8400-e29b-41d4-a716-446655440002",
//!     "startTime": "2025-03-10T10:00:00Z",
//!     "endTime": "2025-03-10T11:00:00Z"
//!   }'
//! ```

use crate::engine::{BookingView, CreateBooking};
use crate::server::state::AppState;
use crate::types::{Booking, BookingId, ReservationStatus};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use courtside_web::{Actor, AppError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Booking as returned by create and cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    /// Booking ID
    pub booking_id: BookingId,
    /// Reservation status
    pub status: ReservationStatus,
    /// Slot start
    pub start_time: DateTime<Utc>,
    /// Slot end
    pub end_time: DateTime<Utc>,
    /// Price in minor units
    pub price_cents: i64,
    /// End of the hold while unpaid
    pub reservation_expires_at: Option<DateTime<Utc>>,
}

impl From<&Booking> for BookingResponse {
    fn from(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id,
            status: booking.status,
            start_time: booking.interval.start(),
            end_time: booking.interval.end(),
            price_cents: booking.price.cents(),
            reservation_expires_at: booking.reservation_expires_at,
        }
    }
}

/// Reserve a slot.
///
/// # Errors
///
/// `400` for a bad interval or unknown court, `403` when a player books for
/// someone else, `409` when the slot is taken.
pub async fn create_booking(
    actor: Actor,
    State(state): State<AppState>,
    payload: Result<Json<CreateBooking>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let Json(request) = payload?;
    let booking = state.engine.create_booking(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(BookingResponse::from(&booking))))
}

/// Booking and payment status.
///
/// # Errors
///
/// `404` if the booking does not exist or the caller may not see it.
pub async fn get_booking(
    actor: Actor,
    Path(booking_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<BookingView>, AppError> {
    let view = state.engine.get_status(&actor, BookingId::from_uuid(booking_id)).await?;
    Ok(Json(view))
}

/// Cancel a booking.
///
/// # Errors
///
/// `404` for an unknown booking, `403` for strangers, `400` when already
/// cancelled.
pub async fn cancel_booking(
    actor: Actor,
    Path(booking_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.engine.cancel(&actor, BookingId::from_uuid(booking_id)).await?;
    Ok(Json(BookingResponse::from(&booking)))
}
