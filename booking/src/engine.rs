//! Booking engine.
//!
//! Each operation is one store transaction: load, check, run the lifecycle
//! reducer, write the booking and its statistics, commit. A transaction the
//! store aborts on a serialization conflict is re-run from the start, so the
//! conflict check of the loser sees the winner's row. Domain failures are
//! never retried. Notifications run only after the commit succeeded.

use crate::conflict;
use crate::error::BookingError;
use crate::lifecycle::{BookingAction, BookingDraft, BookingEffects, BookingEnvironment, BookingLifecycle};
use crate::pricing::{self, PriceQuote};
use crate::statistics;
use crate::store::{BookingStore, BookingTx, StoreError};
use crate::types::{
    Booking, BookingId, BookingStatus, ClubId, CourtId, Currency, Interval, Money, PaymentStatus, ReservationStatus,
    UserId,
};
use chrono::{DateTime, Utc};
use courtside_runtime::retry::{retry_with_predicate, RetryPolicy};
use courtside_web::{Actor, Role};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Tunables of the engine.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Longest bookable slot
    pub max_booking_minutes: i64,
    /// Re-runs of a transaction aborted by a serialization conflict
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_booking_minutes: 480,
            retry: RetryPolicy::default(),
        }
    }
}

/// Booking request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBooking {
    /// Court to book
    pub court_id: CourtId,
    /// Player the booking is for
    pub user_id: UserId,
    /// Optional coach
    #[serde(default)]
    pub coach_id: Option<UserId>,
    /// Slot start (UTC)
    pub start_time: DateTime<Utc>,
    /// Slot end (UTC)
    pub end_time: DateTime<Utc>,
}

/// Booking as shown to its owner and club staff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    /// Booking
    pub booking_id: BookingId,
    /// Combined status
    pub status: ReservationStatus,
    /// Session status at the time of the read
    pub booking_status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Court
    pub court_id: CourtId,
    /// Court name
    pub court_name: String,
    /// Club
    pub club_id: ClubId,
    /// Club name
    pub club_name: String,
    /// Slot start
    pub start_time: DateTime<Utc>,
    /// Slot end
    pub end_time: DateTime<Utc>,
    /// Price in minor units
    pub price: Money,
    /// Currency
    pub currency: Currency,
    /// Hold end, while reserved
    pub reservation_expires_at: Option<DateTime<Utc>>,
}

/// Reservation, status, cancellation and pricing operations.
#[derive(Clone)]
pub struct BookingEngine {
    store: Arc<dyn BookingStore>,
    env: BookingEnvironment,
    lifecycle: BookingLifecycle,
    settings: EngineSettings,
}

impl BookingEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>, env: BookingEnvironment, settings: EngineSettings) -> Self {
        Self {
            store,
            env,
            lifecycle: BookingLifecycle::new(),
            settings,
        }
    }

    /// Store the engine writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    /// Lifecycle environment.
    #[must_use]
    pub const fn env(&self) -> &BookingEnvironment {
        &self.env
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.env.clock.now()
    }

    /// Run one lifecycle action.
    ///
    /// # Errors
    ///
    /// See [`BookingLifecycle::transition`].
    pub(crate) fn transition(
        &self,
        booking: Option<Booking>,
        action: BookingAction,
    ) -> Result<(Option<Booking>, BookingEffects), BookingError> {
        let transition = self.lifecycle.transition(booking, action, &self.env)?;
        Ok((transition.booking, transition.effects))
    }

    /// Run `unit` until it succeeds, fails for a domain reason, or the retry
    /// budget for serialization conflicts is spent.
    pub(crate) async fn in_transaction<T, F, Fut>(&self, unit: F) -> Result<T, BookingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BookingError>>,
    {
        retry_with_predicate(&self.settings.retry, unit, |err: &BookingError| {
            let retryable = err.is_retryable();
            if retryable {
                crate::metrics::record_serialization_retry();
            }
            retryable
        })
        .await
    }

    /// Reserve a slot.
    ///
    /// The booking is created `reserved` with a hold of the configured length
    /// and counted in the club statistics in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Validation`]: bad interval, slot in the past, slot
    ///   too long, unknown or inactive court
    /// - [`BookingError::Forbidden`]: booking for someone else without
    ///   managing the club
    /// - [`BookingError::SlotConflict`]: slot held or paid by another booking
    #[tracing::instrument(skip(self, actor, request), fields(court_id = %request.court_id, user_id = %request.user_id))]
    pub async fn create_booking(&self, actor: &Actor, request: CreateBooking) -> Result<Booking, BookingError> {
        let interval = self.validate_request(actor, &request)?;
        let request = &request;

        let result = self
            .in_transaction(move || async move {
                let mut tx = self.store.begin().await?;
                let reserved = self.reserve_in(tx.as_mut(), actor, request, interval).await?;
                tx.commit().await?;
                Ok(reserved)
            })
            .await;

        match result {
            Ok((booking, effects)) => {
                crate::metrics::record_booking("created");
                tracing::info!(
                    booking_id = %booking.id,
                    price = booking.price.cents(),
                    expires_at = ?booking.reservation_expires_at,
                    "Booking reserved"
                );
                courtside_runtime::execute(effects).await;
                Ok(booking)
            }
            Err(err) => {
                crate::metrics::record_booking("rejected");
                tracing::info!(error = %err, "Booking refused");
                Err(err)
            }
        }
    }

    fn validate_request(&self, actor: &Actor, request: &CreateBooking) -> Result<Interval, BookingError> {
        let interval = Interval::new(request.start_time, request.end_time)
            .ok_or_else(|| BookingError::Validation("endTime must be after startTime".to_string()))?;
        if interval.start() <= self.now() {
            return Err(BookingError::Validation("cannot book a slot in the past".to_string()));
        }
        if interval.duration_minutes() > self.settings.max_booking_minutes {
            return Err(BookingError::Validation(format!(
                "bookings are limited to {} minutes",
                self.settings.max_booking_minutes
            )));
        }
        if actor.role == Role::Player && *request.user_id.as_uuid() != actor.user_id {
            return Err(BookingError::Forbidden("players may only book for themselves".to_string()));
        }
        Ok(interval)
    }

    async fn reserve_in(
        &self,
        tx: &mut dyn BookingTx,
        actor: &Actor,
        request: &CreateBooking,
        interval: Interval,
    ) -> Result<(Booking, BookingEffects), BookingError> {
        let now = self.now();
        let context = tx
            .court_context(request.court_id)
            .await?
            .ok_or_else(|| BookingError::Validation(format!("court {} not found", request.court_id)))?;
        if !context.court.active {
            return Err(BookingError::Validation("court is not open for booking".to_string()));
        }
        if *request.user_id.as_uuid() != actor.user_id && !actor.manages_club(*context.club.id.as_uuid()) {
            return Err(BookingError::Forbidden("not allowed to book for other users at this club".to_string()));
        }

        conflict::ensure_free(tx, request.court_id, &interval, None, now).await?;

        let rules = tx.price_rules(request.court_id).await?;
        let quote = pricing::resolve(&context, &rules, interval.start(), interval.duration_minutes())?;

        let draft = BookingDraft {
            id: BookingId::new(),
            court_id: context.court.id,
            club_id: context.club.id,
            user_id: request.user_id,
            coach_id: request.coach_id,
            interval,
            price: quote.price,
            currency: quote.currency,
            sport_type: context.court.sport_type.clone(),
        };
        let (booking, effects) = self.transition(None, BookingAction::Reserve { draft })?;
        let booking = booking.ok_or_else(|| BookingError::Internal("reservation produced no booking".to_string()))?;

        match tx.insert_booking(&booking).await {
            Err(StoreError::Constraint(constraint)) => {
                tracing::debug!(%constraint, "Insert hit slot constraint");
                crate::metrics::record_slot_conflict();
                return Err(BookingError::SlotConflict {
                    court_id: request.court_id,
                });
            }
            other => other?,
        }
        statistics::record_booking(tx, &booking).await?;
        Ok((booking, effects))
    }

    /// Status of a booking, as seen by its owner or the club's staff.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] when the booking does not exist or the
    /// caller may not see it.
    pub async fn get_status(&self, actor: &Actor, booking_id: BookingId) -> Result<BookingView, BookingError> {
        let mut tx = self.store.begin().await?;
        let booking = tx
            .booking(booking_id)
            .await?
            .filter(|booking| can_see(actor, booking))
            .ok_or_else(|| BookingError::not_found("Booking", booking_id))?;
        let context = tx
            .court_context(booking.court_id)
            .await?
            .ok_or_else(|| BookingError::Internal(format!("booking {booking_id} references a missing court")))?;
        drop(tx);

        Ok(BookingView {
            booking_id: booking.id,
            status: booking.status,
            booking_status: booking.booking_status_at(self.now()),
            payment_status: booking.payment_status,
            court_id: booking.court_id,
            court_name: context.court.name,
            club_id: booking.club_id,
            club_name: context.club.name,
            start_time: booking.interval.start(),
            end_time: booking.interval.end(),
            price: booking.price,
            currency: booking.currency,
            reservation_expires_at: booking.reservation_expires_at,
        })
    }

    /// Cancel a reserved or paid booking.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`], [`BookingError::Forbidden`] for callers
    /// that neither own the booking nor manage its club,
    /// [`BookingError::AlreadyFinalized`] when already cancelled.
    #[tracing::instrument(skip(self, actor), fields(booking_id = %booking_id))]
    pub async fn cancel(&self, actor: &Actor, booking_id: BookingId) -> Result<Booking, BookingError> {
        let (booking, effects) = self
            .in_transaction(move || async move {
                let mut tx = self.store.begin().await?;
                let current = tx
                    .booking(booking_id)
                    .await?
                    .ok_or_else(|| BookingError::not_found("Booking", booking_id))?;
                if !can_see(actor, &current) {
                    return Err(BookingError::Forbidden("not allowed to cancel this booking".to_string()));
                }

                let (cancelled, effects) = self.transition(Some(current), BookingAction::Cancel)?;
                let cancelled =
                    cancelled.ok_or_else(|| BookingError::Internal("cancellation produced no booking".to_string()))?;
                tx.update_booking(&cancelled).await?;
                statistics::record_cancellation(tx.as_mut(), &cancelled).await?;
                tx.commit().await?;
                Ok((cancelled, effects))
            })
            .await?;

        crate::metrics::record_booking("cancelled");
        tracing::info!(booking_id = %booking.id, "Booking cancelled");
        courtside_runtime::execute(effects).await;
        Ok(booking)
    }

    /// Price a slot without reserving it.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for a bad interval,
    /// [`BookingError::NotFound`] for an unknown court.
    pub async fn quote(
        &self,
        court_id: CourtId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PriceQuote, BookingError> {
        let interval = Interval::new(start, end)
            .ok_or_else(|| BookingError::Validation("endTime must be after startTime".to_string()))?;
        let mut tx = self.store.begin().await?;
        pricing::resolve_in(tx.as_mut(), court_id, interval.start(), interval.duration_minutes()).await
    }

    /// The actor's own reservation on exactly this slot, if any.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn reservation_for_slot(
        &self,
        actor: &Actor,
        court_id: CourtId,
        interval: Interval,
    ) -> Result<Option<Booking>, BookingError> {
        let mut tx = self.store.begin().await?;
        let user_id = UserId::from_uuid(actor.user_id);
        Ok(tx.reservation_for_slot(user_id, court_id, interval).await?)
    }

    /// Delete reservations whose hold lapsed before `cutoff` without payment.
    ///
    /// Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn purge_expired(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<usize, BookingError> {
        let effects = self
            .in_transaction(move || async move {
                let mut tx = self.store.begin().await?;
                let stale = tx.purgeable_reservations(cutoff, limit).await?;
                let mut effects = BookingEffects::new();
                for booking in stale {
                    let id = booking.id;
                    let (_, purged) = self.transition(Some(booking), BookingAction::Purge)?;
                    tx.delete_booking(id).await?;
                    effects.extend(purged);
                }
                tx.commit().await?;
                Ok(effects)
            })
            .await?;

        let purged = effects.len();
        if purged > 0 {
            for _ in 0..purged {
                crate::metrics::record_booking("purged");
            }
            tracing::info!(purged, %cutoff, "Purged lapsed reservations");
        }
        courtside_runtime::execute(effects).await;
        Ok(purged)
    }
}

/// Owner, staff of the club, or an admin.
fn can_see(actor: &Actor, booking: &Booking) -> bool {
    *booking.user_id.as_uuid() == actor.user_id || actor.manages_club(*booking.club_id.as_uuid())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::notifier::BroadcastNotifier;
    use crate::store::MemoryBookingStore;
    use crate::types::{Club, Court, OrganizationId};
    use chrono::{Duration, TimeZone};
    use courtside_core::environment::Clock;
    use courtside_testing::ManualClock;

    struct Fixture {
        engine: BookingEngine,
        store: MemoryBookingStore,
        clock: ManualClock,
        court: Court,
    }

    async fn fixture() -> Fixture {
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap());
        let store = MemoryBookingStore::new();
        let club = Club {
            id: ClubId::new(),
            organization_id: OrganizationId::new(),
            name: "Riverside".to_string(),
            utc_offset_minutes: 0,
            currency: Currency::parse("EUR").unwrap(),
        };
        let court = Court {
            id: CourtId::new(),
            club_id: club.id,
            name: "Court 1".to_string(),
            sport_type: "tennis".to_string(),
            default_price: Money::from_cents(5000),
            active: true,
        };
        store.put_club(club).await;
        store.put_court(court.clone()).await;

        let env = BookingEnvironment::new(
            Arc::new(clock.clone()),
            Arc::new(BroadcastNotifier::default()),
            Duration::minutes(15),
        );
        let settings = EngineSettings {
            retry: RetryPolicy::builder().initial_delay(std::time::Duration::from_millis(1)).build(),
            ..EngineSettings::default()
        };
        Fixture {
            engine: BookingEngine::new(Arc::new(store.clone()), env, settings),
            store,
            clock,
            court,
        }
    }

    fn request(court_id: CourtId, user: UserId, hour: u32) -> CreateBooking {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap();
        CreateBooking {
            court_id,
            user_id: user,
            coach_id: None,
            start_time: start,
            end_time: start + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn reserve_sets_hold_and_price() {
        let f = fixture().await;
        let user = UserId::new();
        let booking = f
            .engine
            .create_booking(&Actor::player(*user.as_uuid()), request(f.court.id, user, 10))
            .await
            .unwrap();

        assert_eq!(booking.status, ReservationStatus::Reserved);
        assert_eq!(booking.price, Money::from_cents(5000));
        assert_eq!(booking.reservation_expires_at, Some(f.clock.now() + Duration::minutes(15)));
        assert!(f.store.get_booking(booking.id).await.is_some());
    }

    #[tokio::test]
    async fn players_cannot_book_for_others() {
        let f = fixture().await;
        let err = f
            .engine
            .create_booking(&Actor::player(uuid::Uuid::new_v4()), request(f.court.id, UserId::new(), 10))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Forbidden(_)));
    }

    #[tokio::test]
    async fn staff_books_for_players_of_their_club_only() {
        let f = fixture().await;
        let player = UserId::new();
        let own_staff = Actor::staff(uuid::Uuid::new_v4(), vec![*f.court.club_id.as_uuid()]);
        let other_staff = Actor::staff(uuid::Uuid::new_v4(), vec![uuid::Uuid::new_v4()]);

        assert!(f.engine.create_booking(&own_staff, request(f.court.id, player, 10)).await.is_ok());
        let err = f
            .engine
            .create_booking(&other_staff, request(f.court.id, player, 12))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Forbidden(_)));
    }

    #[tokio::test]
    async fn rejects_bad_intervals() {
        let f = fixture().await;
        let user = UserId::new();
        let actor = Actor::player(*user.as_uuid());

        let mut inverted = request(f.court.id, user, 10);
        inverted.end_time = inverted.start_time;
        assert!(matches!(
            f.engine.create_booking(&actor, inverted).await,
            Err(BookingError::Validation(_))
        ));

        assert!(matches!(
            f.engine.create_booking(&actor, request(f.court.id, user, 7)).await,
            Err(BookingError::Validation(_))
        ));

        let mut marathon = request(f.court.id, user, 10);
        marathon.end_time = marathon.start_time + Duration::hours(9);
        assert!(matches!(
            f.engine.create_booking(&actor, marathon).await,
            Err(BookingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unknown_court_is_a_validation_error() {
        let f = fixture().await;
        let user = UserId::new();
        let err = f
            .engine
            .create_booking(&Actor::player(*user.as_uuid()), request(CourtId::new(), user, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn status_is_hidden_from_strangers() {
        let f = fixture().await;
        let user = UserId::new();
        let booking = f
            .engine
            .create_booking(&Actor::player(*user.as_uuid()), request(f.court.id, user, 10))
            .await
            .unwrap();

        let view = f.engine.get_status(&Actor::player(*user.as_uuid()), booking.id).await.unwrap();
        assert_eq!(view.court_name, "Court 1");
        assert_eq!(view.club_name, "Riverside");
        assert_eq!(view.payment_status, PaymentStatus::Unpaid);

        let err = f
            .engine
            .get_status(&Actor::player(uuid::Uuid::new_v4()), booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn completed_is_derived_from_the_clock() {
        let f = fixture().await;
        let user = UserId::new();
        let actor = Actor::player(*user.as_uuid());
        let booking = f.engine.create_booking(&actor, request(f.court.id, user, 10)).await.unwrap();

        f.clock.advance(Duration::hours(4));
        let view = f.engine.get_status(&actor, booking.id).await.unwrap();
        assert_eq!(view.booking_status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_frees_the_slot_and_counts() {
        let f = fixture().await;
        let user = UserId::new();
        let actor = Actor::player(*user.as_uuid());
        let booking = f.engine.create_booking(&actor, request(f.court.id, user, 10)).await.unwrap();

        let cancelled = f.engine.cancel(&actor, booking.id).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert!(matches!(
            f.engine.cancel(&actor, booking.id).await,
            Err(BookingError::AlreadyFinalized { .. })
        ));

        let other = UserId::new();
        assert!(f
            .engine
            .create_booking(&Actor::player(*other.as_uuid()), request(f.court.id, other, 10))
            .await
            .is_ok());

        let stats = f
            .store
            .get_statistic(booking.club_id, booking.interval.start().date_naive())
            .await
            .unwrap();
        assert_eq!(stats.bookings_created, 2);
        assert_eq!(stats.bookings_cancelled, 1);
    }

    #[tokio::test]
    async fn strangers_cannot_cancel() {
        let f = fixture().await;
        let user = UserId::new();
        let booking = f
            .engine
            .create_booking(&Actor::player(*user.as_uuid()), request(f.court.id, user, 10))
            .await
            .unwrap();
        assert!(matches!(
            f.engine.cancel(&Actor::player(uuid::Uuid::new_v4()), booking.id).await,
            Err(BookingError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn quote_unknown_court_is_not_found() {
        let f = fixture().await;
        let start = f.clock.now() + Duration::hours(2);
        assert!(matches!(
            f.engine.quote(CourtId::new(), start, start + Duration::hours(1)).await,
            Err(BookingError::NotFound { .. })
        ));
        let quote = f.engine.quote(f.court.id, start, start + Duration::minutes(90)).await.unwrap();
        assert_eq!(quote.price, Money::from_cents(7500));
    }

    #[tokio::test]
    async fn purge_removes_only_long_lapsed_holds() {
        let f = fixture().await;
        let user = UserId::new();
        let actor = Actor::player(*user.as_uuid());
        let booking = f.engine.create_booking(&actor, request(f.court.id, user, 20)).await.unwrap();

        assert_eq!(f.engine.purge_expired(f.clock.now(), 100).await.unwrap(), 0);

        f.clock.advance(Duration::hours(2));
        let cutoff = f.clock.now() - Duration::hours(1);
        assert_eq!(f.engine.purge_expired(cutoff, 100).await.unwrap(), 1);
        assert!(f.store.get_booking(booking.id).await.is_none());
    }

    #[tokio::test]
    async fn serialization_failures_are_retried() {
        let f = fixture().await;
        f.store.fail_commits_with_serialization(2);
        let user = UserId::new();
        let booking = f
            .engine
            .create_booking(&Actor::player(*user.as_uuid()), request(f.court.id, user, 10))
            .await
            .unwrap();
        assert!(f.store.get_booking(booking.id).await.is_some());
    }
}
