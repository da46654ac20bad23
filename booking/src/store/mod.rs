//! Persistence port for the booking engine.
//!
//! Every engine operation runs inside one [`BookingTx`]: reads, the conflict
//! check, the booking write and the statistics update commit or roll back
//! together. Dropping a transaction without calling [`BookingTx::commit`]
//! rolls it back.
//!
//! Implementations:
//! - [`PostgresBookingStore`]: `SERIALIZABLE` transactions; serialization
//!   failures surface as [`StoreError::Serialization`] and the engine re-runs
//!   the unit of work
//! - [`MemoryBookingStore`]: whole-store transactions over a working copy,
//!   for tests and local development

pub mod memory;
pub mod postgres;

pub use memory::MemoryBookingStore;
pub use postgres::PostgresBookingStore;

use crate::statistics::StatisticDelta;
use crate::types::{
    Booking, BookingId, ClubDailyStatistic, ClubId, CourtContext, CourtId, Interval, OrganizationId, PaymentAccount,
    PaymentAccountId, PaymentIntent, PriceRule, ProviderKind, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The transaction lost a serialization race and must be re-run
    #[error("serialization failure, transaction must be retried")]
    Serialization,

    /// A unique or exclusion constraint rejected the write
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A stored row could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Any other database failure
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// The store is not reachable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if courtside_postgres::is_retryable(&err) {
            Self::Serialization
        } else if courtside_postgres::is_constraint_violation(&err) {
            let constraint = err
                .as_database_error()
                .and_then(|db| db.constraint().map(str::to_string))
                .unwrap_or_default();
            Self::Constraint(constraint)
        } else {
            Self::Database(err)
        }
    }
}

/// Booking persistence.
pub trait BookingStore: Send + Sync {
    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection is available.
    fn begin(&self) -> StoreFuture<'_, Box<dyn BookingTx>>;

    /// Cheap connectivity check for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// An open store transaction.
pub trait BookingTx: Send {
    // ---- courts & pricing ---------------------------------------------------

    /// Court and owning club.
    fn court_context(&mut self, court_id: CourtId) -> StoreFuture<'_, Option<CourtContext>>;

    /// Price rules of a court.
    fn price_rules(&mut self, court_id: CourtId) -> StoreFuture<'_, Vec<PriceRule>>;

    // ---- bookings -----------------------------------------------------------

    /// Booking by id.
    fn booking(&mut self, id: BookingId) -> StoreFuture<'_, Option<Booking>>;

    /// Non-cancelled bookings on `court_id` overlapping `interval`.
    fn overlapping_bookings(&mut self, court_id: CourtId, interval: Interval) -> StoreFuture<'_, Vec<Booking>>;

    /// A user's `reserved` booking on exactly this slot.
    fn reservation_for_slot(
        &mut self,
        user_id: UserId,
        court_id: CourtId,
        interval: Interval,
    ) -> StoreFuture<'_, Option<Booking>>;

    /// Insert a new booking.
    fn insert_booking(&mut self, booking: &Booking) -> StoreFuture<'_, ()>;

    /// Overwrite an existing booking.
    fn update_booking(&mut self, booking: &Booking) -> StoreFuture<'_, ()>;

    /// Reservations never paid whose hold lapsed before `cutoff` and that have
    /// no pending intent.
    fn purgeable_reservations(&mut self, cutoff: DateTime<Utc>, limit: i64) -> StoreFuture<'_, Vec<Booking>>;

    /// Delete a booking together with its payment intents.
    fn delete_booking(&mut self, id: BookingId) -> StoreFuture<'_, ()>;

    // ---- payments -----------------------------------------------------------

    /// Accounts for `provider` owned by the club or its organization.
    fn payment_accounts(
        &mut self,
        provider: ProviderKind,
        club_id: ClubId,
        organization_id: OrganizationId,
    ) -> StoreFuture<'_, Vec<PaymentAccount>>;

    /// Account by id.
    fn payment_account(&mut self, id: PaymentAccountId) -> StoreFuture<'_, Option<PaymentAccount>>;

    /// Insert a new intent.
    fn insert_intent(&mut self, intent: &PaymentIntent) -> StoreFuture<'_, ()>;

    /// Overwrite an existing intent.
    fn update_intent(&mut self, intent: &PaymentIntent) -> StoreFuture<'_, ()>;

    /// Intent by order reference.
    fn intent_by_reference(&mut self, order_reference: &str) -> StoreFuture<'_, Option<PaymentIntent>>;

    /// Intents of a booking, oldest first.
    fn intents_for_booking(&mut self, booking_id: BookingId) -> StoreFuture<'_, Vec<PaymentIntent>>;

    // ---- statistics ---------------------------------------------------------

    /// Add `delta` to the counters of `(club_id, date)`, creating the row.
    fn apply_statistic(&mut self, club_id: ClubId, date: NaiveDate, delta: StatisticDelta) -> StoreFuture<'_, ()>;

    /// Remember that `user_id` booked at `club_id` on `date`.
    ///
    /// Returns `true` the first time the triple is seen.
    fn mark_active_user(&mut self, club_id: ClubId, date: NaiveDate, user_id: UserId) -> StoreFuture<'_, bool>;

    /// Counters of `(club_id, date)`.
    fn statistic(&mut self, club_id: ClubId, date: NaiveDate) -> StoreFuture<'_, Option<ClubDailyStatistic>>;

    // ---- boundary -----------------------------------------------------------

    /// Commit all writes.
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;
}
