//! Reservation lifecycle.
//!
//! ```text
//!            Reserve                ConfirmPayment
//!   (none) ──────────► reserved ─────────────────► paid
//!                        │  ▲ RefreshHold           │
//!                        │  └──────┘                │
//!                        │ Cancel                   │ Cancel
//!                        ▼                          ▼
//!                     cancelled ◄───────────────────┘
//! ```
//!
//! A reservation whose hold lapsed stays `reserved`: the conflict detector
//! stops counting it, but the owner can still refresh the hold or pay. Only
//! `Purge` removes a lapsed, never-paid reservation.
//!
//! The reducer never touches the store. The engine loads the booking, runs
//! the reducer, persists the result and executes the returned effects after
//! the transaction commits. Every accepted transition yields exactly one
//! notification effect.

use crate::error::BookingError;
use crate::notifier::{BookingEvent, BookingEventKind, BookingNotifier};
use crate::types::{
    Booking, BookingId, BookingStatus, ClubId, CourtId, Currency, Interval, Money, PaymentStatus, ReservationStatus,
    UserId,
};
use chrono::{DateTime, Duration, Utc};
use courtside_core::{effect::Effect, environment::Clock, reducer::Reducer, smallvec, SmallVec};
use std::sync::Arc;

/// Effects returned by one transition.
pub type BookingEffects = SmallVec<[Effect<BookingAction>; 4]>;

/// Everything needed to open a reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingDraft {
    /// New booking ID
    pub id: BookingId,
    /// Court
    pub court_id: CourtId,
    /// Club owning the court
    pub club_id: ClubId,
    /// Booking owner
    pub user_id: UserId,
    /// Optional coach
    pub coach_id: Option<UserId>,
    /// Slot
    pub interval: Interval,
    /// Resolved price
    pub price: Money,
    /// Club currency
    pub currency: Currency,
    /// Sport played on the court
    pub sport_type: String,
}

/// Lifecycle commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingAction {
    /// Open a reservation with a fresh hold
    Reserve {
        /// Booking to create
        draft: BookingDraft,
    },
    /// Restart the hold of a reservation
    RefreshHold,
    /// Mark the booking paid
    ConfirmPayment,
    /// Cancel the booking
    Cancel,
    /// Remove a lapsed reservation that was never paid
    Purge,
}

/// Why the reducer refused an action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// No booking loaded
    Missing,
    /// A booking is already loaded
    AlreadyExists(BookingId),
    /// Booking is paid or cancelled
    Finalized {
        /// Booking
        booking_id: BookingId,
        /// Its status
        status: ReservationStatus,
    },
    /// The hold is still running
    HoldActive(BookingId),
}

impl From<Rejection> for BookingError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Missing => Self::Internal("lifecycle action without a booking".to_string()),
            Rejection::AlreadyExists(id) => Self::Internal(format!("booking {id} already exists")),
            Rejection::Finalized { booking_id, status } => Self::AlreadyFinalized { booking_id, status },
            Rejection::HoldActive(id) => Self::Internal(format!("booking {id} still holds its slot")),
        }
    }
}

/// State of one booking while a command runs.
#[derive(Clone, Debug, Default)]
pub struct BookingState {
    /// The booking, if it exists
    pub booking: Option<Booking>,
    /// Outcome of the last action, `None` when accepted
    pub rejection: Option<Rejection>,
}

impl BookingState {
    /// State without a booking.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            booking: None,
            rejection: None,
        }
    }

    /// State holding an existing booking.
    #[must_use]
    pub const fn of(booking: Booking) -> Self {
        Self {
            booking: Some(booking),
            rejection: None,
        }
    }
}

/// Dependencies of the lifecycle reducer.
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Time source for holds and timestamps
    pub clock: Arc<dyn Clock>,
    /// Receives committed changes
    pub notifier: Arc<dyn BookingNotifier>,
    /// Length of a reservation hold
    pub hold: Duration,
}

impl BookingEnvironment {
    /// Create an environment.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn BookingNotifier>, hold: Duration) -> Self {
        Self { clock, notifier, hold }
    }
}

/// Result of an accepted transition.
pub struct Transition {
    /// Booking after the action, `None` once purged
    pub booking: Option<Booking>,
    /// Notifications to run after commit
    pub effects: BookingEffects,
}

/// Reducer owning booking status transitions.
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingLifecycle;

impl BookingLifecycle {
    /// Create the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run one action against `booking`.
    ///
    /// # Errors
    ///
    /// [`BookingError::AlreadyFinalized`] when the booking is paid or
    /// cancelled, [`BookingError::Internal`] for impossible transitions.
    pub fn transition(
        &self,
        booking: Option<Booking>,
        action: BookingAction,
        env: &BookingEnvironment,
    ) -> Result<Transition, BookingError> {
        let mut state = BookingState {
            booking,
            rejection: None,
        };
        let effects = self.reduce(&mut state, action, env);
        match state.rejection {
            Some(rejection) => Err(rejection.into()),
            None => Ok(Transition {
                booking: state.booking,
                effects,
            }),
        }
    }

    fn validate(state: &BookingState, action: &BookingAction, now: DateTime<Utc>) -> Result<(), Rejection> {
        let existing = match (action, &state.booking) {
            (BookingAction::Reserve { .. }, None) => return Ok(()),
            (BookingAction::Reserve { .. }, Some(booking)) => return Err(Rejection::AlreadyExists(booking.id)),
            (_, None) => return Err(Rejection::Missing),
            (_, Some(booking)) => booking,
        };

        let finalized = Rejection::Finalized {
            booking_id: existing.id,
            status: existing.status,
        };
        match (action, existing.status) {
            (_, ReservationStatus::Cancelled)
            | (
                BookingAction::RefreshHold | BookingAction::ConfirmPayment | BookingAction::Purge,
                ReservationStatus::Paid,
            ) => Err(finalized),
            (BookingAction::Purge, ReservationStatus::Reserved) if !existing.hold_lapsed(now) => {
                Err(Rejection::HoldActive(existing.id))
            }
            _ => Ok(()),
        }
    }

    fn notify(env: &BookingEnvironment, kind: BookingEventKind, booking: &Booking) -> Effect<BookingAction> {
        let notifier = Arc::clone(&env.notifier);
        let event = BookingEvent::new(kind, booking);
        Effect::fire_and_forget(async move { notifier.publish(event).await })
    }
}

impl Reducer for BookingLifecycle {
    type State = BookingState;
    type Action = BookingAction;
    type Environment = BookingEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        let now = env.clock.now();
        if let Err(rejection) = Self::validate(state, &action, now) {
            tracing::debug!(?rejection, "Lifecycle action rejected");
            state.rejection = Some(rejection);
            return SmallVec::new();
        }
        state.rejection = None;

        match (action, state.booking.take()) {
            (BookingAction::Reserve { draft }, _) => {
                let booking = Booking {
                    id: draft.id,
                    court_id: draft.court_id,
                    club_id: draft.club_id,
                    user_id: draft.user_id,
                    coach_id: draft.coach_id,
                    interval: draft.interval,
                    price: draft.price,
                    currency: draft.currency,
                    sport_type: draft.sport_type,
                    status: ReservationStatus::Reserved,
                    booking_status: BookingStatus::Upcoming,
                    payment_status: PaymentStatus::Unpaid,
                    reservation_expires_at: Some(now + env.hold),
                    created_at: now,
                    updated_at: now,
                };
                let effect = Self::notify(env, BookingEventKind::BookingCreated, &booking);
                state.booking = Some(booking);
                smallvec![effect]
            }

            (BookingAction::RefreshHold, Some(mut booking)) => {
                booking.reservation_expires_at = Some(now + env.hold);
                booking.updated_at = now;
                let effect = Self::notify(env, BookingEventKind::BookingUpdated, &booking);
                state.booking = Some(booking);
                smallvec![effect]
            }

            (BookingAction::ConfirmPayment, Some(mut booking)) => {
                booking.status = ReservationStatus::Paid;
                booking.booking_status = BookingStatus::Upcoming;
                booking.payment_status = PaymentStatus::Paid;
                booking.reservation_expires_at = None;
                booking.updated_at = now;
                let effect = Self::notify(env, BookingEventKind::BookingUpdated, &booking);
                state.booking = Some(booking);
                smallvec![effect]
            }

            (BookingAction::Cancel, Some(mut booking)) => {
                booking.status = ReservationStatus::Cancelled;
                booking.booking_status = BookingStatus::Cancelled;
                booking.reservation_expires_at = None;
                booking.updated_at = now;
                let effect = Self::notify(env, BookingEventKind::BookingUpdated, &booking);
                state.booking = Some(booking);
                smallvec![effect]
            }

            (BookingAction::Purge, Some(booking)) => {
                smallvec![Self::notify(env, BookingEventKind::BookingDeleted, &booking)]
            }

            // Ruled out by validate.
            (_, None) => {
                state.rejection = Some(Rejection::Missing);
                SmallVec::new()
            }
        }
    }
}
