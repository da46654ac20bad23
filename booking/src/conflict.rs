//! Slot conflict detection.
//!
//! A slot is taken when another booking on the same court overlaps it and is
//! either paid or reserved with a hold that has not lapsed yet. Lapsed holds
//! stay in storage but stop blocking.
//!
//! The check is only meaningful inside the transaction that goes on to write
//! the booking: two concurrent creators racing for one slot are separated by
//! the store's serializable isolation, not by anything in this module.

use crate::error::BookingError;
use crate::store::BookingTx;
use crate::types::{Booking, BookingId, CourtId, Interval};
use chrono::{DateTime, Utc};

/// First booking in `candidates` that blocks `interval` at `now`.
#[must_use]
pub fn first_conflict<'a>(
    candidates: &'a [Booking],
    court_id: CourtId,
    interval: &Interval,
    excluding: Option<BookingId>,
    now: DateTime<Utc>,
) -> Option<&'a Booking> {
    candidates.iter().find(|existing| {
        existing.court_id == court_id
            && Some(existing.id) != excluding
            && existing.interval.overlaps(interval)
            && existing.blocks_slot(now)
    })
}

/// Whether `interval` on `court_id` is blocked by another booking.
///
/// # Errors
///
/// Propagates store failures.
#[tracing::instrument(skip(tx), fields(court_id = %court_id))]
pub async fn has_conflict(
    tx: &mut dyn BookingTx,
    court_id: CourtId,
    interval: &Interval,
    excluding: Option<BookingId>,
    now: DateTime<Utc>,
) -> Result<bool, BookingError> {
    let candidates = tx.overlapping_bookings(court_id, *interval).await?;
    let conflict = first_conflict(&candidates, court_id, interval, excluding, now);
    if let Some(existing) = conflict {
        tracing::debug!(blocking_booking = %existing.id, status = %existing.status, "Slot conflict");
    }
    Ok(conflict.is_some())
}

/// Fail with [`BookingError::SlotConflict`] when the slot is taken.
///
/// # Errors
///
/// [`BookingError::SlotConflict`], or store failures.
pub async fn ensure_free(
    tx: &mut dyn BookingTx,
    court_id: CourtId,
    interval: &Interval,
    excluding: Option<BookingId>,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    if has_conflict(tx, court_id, interval, excluding, now).await? {
        crate::metrics::record_slot_conflict();
        return Err(BookingError::SlotConflict { court_id });
    }
    Ok(())
}
