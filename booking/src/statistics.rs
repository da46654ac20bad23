//! Per-club daily statistics.
//!
//! Counters are bumped incrementally inside the transaction that changes the
//! booking, so they commit or roll back with it. Nothing here scans bookings.
//!
//! Attribution:
//! - `bookings_created` and `active_users`: every UTC date the slot touches
//! - `revenue` and `bookings_cancelled`: the UTC date the slot starts on

use crate::error::BookingError;
use crate::store::BookingTx;
use crate::types::{Booking, Money};
use serde::{Deserialize, Serialize};

/// Increment applied to one `(club, date)` row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticDelta {
    /// Bookings created
    pub bookings_created: i64,
    /// Bookings cancelled
    pub bookings_cancelled: i64,
    /// Revenue in minor units
    pub revenue: Money,
    /// Newly active users
    pub active_users: i64,
}

impl StatisticDelta {
    /// Whether the delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Count a newly created booking.
///
/// # Errors
///
/// Propagates store failures.
pub async fn record_booking(tx: &mut dyn BookingTx, booking: &Booking) -> Result<(), BookingError> {
    for date in booking.interval.utc_dates() {
        let first_visit = tx.mark_active_user(booking.club_id, date, booking.user_id).await?;
        let delta = StatisticDelta {
            bookings_created: 1,
            active_users: i64::from(first_visit),
            ..StatisticDelta::default()
        };
        tx.apply_statistic(booking.club_id, date, delta).await?;
    }
    tracing::debug!(booking_id = %booking.id, club_id = %booking.club_id, "Booking counted");
    Ok(())
}

/// Count revenue from a confirmed payment.
///
/// # Errors
///
/// Propagates store failures.
pub async fn record_payment(tx: &mut dyn BookingTx, booking: &Booking, amount: Money) -> Result<(), BookingError> {
    let delta = StatisticDelta {
        revenue: amount,
        ..StatisticDelta::default()
    };
    tx.apply_statistic(booking.club_id, booking.interval.start().date_naive(), delta)
        .await?;
    Ok(())
}

/// Count a cancellation.
///
/// # Errors
///
/// Propagates store failures.
pub async fn record_cancellation(tx: &mut dyn BookingTx, booking: &Booking) -> Result<(), BookingError> {
    let delta = StatisticDelta {
        bookings_cancelled: 1,
        ..StatisticDelta::default()
    };
    tx.apply_statistic(booking.club_id, booking.interval.start().date_naive(), delta)
        .await?;
    Ok(())
}
