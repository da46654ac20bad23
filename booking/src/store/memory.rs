//! In-memory booking store.
//!
//! Transactions take an exclusive lock on the whole store and work on a copy
//! of the tables; commit swaps the copy in, drop discards it. This gives the
//! same all-or-nothing behaviour as the Postgres store with trivially
//! serializable isolation, which is all tests and local runs need.
//!
//! Commit failures can be injected to exercise rollback and retry paths.

use super::{BookingStore, BookingTx, StoreError, StoreFuture};
use crate::statistics::StatisticDelta;
use crate::types::{
    AccountOwner, Booking, BookingId, Club, ClubDailyStatistic, ClubId, Court, CourtContext, CourtId,
    IntentStatus, Interval, OrganizationId, PaymentAccount, PaymentAccountId, PaymentIntent,
    PaymentIntentId, PriceRule, ProviderKind, ReservationStatus, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Tables {
    clubs: HashMap<ClubId, Club>,
    courts: HashMap<CourtId, Court>,
    price_rules: Vec<PriceRule>,
    bookings: HashMap<BookingId, Booking>,
    accounts: Vec<PaymentAccount>,
    intents: HashMap<PaymentIntentId, PaymentIntent>,
    statistics: HashMap<(ClubId, NaiveDate), ClubDailyStatistic>,
    active_users: HashSet<(ClubId, NaiveDate, UserId)>,
}

#[derive(Debug, Default)]
struct Faults {
    serialization: AtomicU32,
    hard: AtomicU32,
}

impl Faults {
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Booking store kept in process memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryBookingStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl MemoryBookingStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a club.
    pub async fn put_club(&self, club: Club) {
        self.tables.lock().await.clubs.insert(club.id, club);
    }

    /// Add or replace a court.
    pub async fn put_court(&self, court: Court) {
        self.tables.lock().await.courts.insert(court.id, court);
    }

    /// Add a price rule.
    pub async fn put_price_rule(&self, rule: PriceRule) {
        self.tables.lock().await.price_rules.push(rule);
    }

    /// Add or replace a payment account.
    pub async fn put_payment_account(&self, account: PaymentAccount) {
        let mut tables = self.tables.lock().await;
        tables.accounts.retain(|a| a.id != account.id);
        tables.accounts.push(account);
    }

    /// Snapshot of a booking.
    pub async fn get_booking(&self, id: BookingId) -> Option<Booking> {
        self.tables.lock().await.bookings.get(&id).cloned()
    }

    /// Snapshot of all bookings on a court.
    pub async fn bookings_on(&self, court_id: CourtId) -> Vec<Booking> {
        let tables = self.tables.lock().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.court_id == court_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| (b.interval.start(), b.created_at));
        bookings
    }

    /// Snapshot of a booking's intents, oldest first.
    pub async fn intents_of(&self, booking_id: BookingId) -> Vec<PaymentIntent> {
        let tables = self.tables.lock().await;
        intents_of(&tables, booking_id)
    }

    /// Snapshot of a statistics row.
    pub async fn get_statistic(&self, club_id: ClubId, date: NaiveDate) -> Option<ClubDailyStatistic> {
        self.tables.lock().await.statistics.get(&(club_id, date)).cloned()
    }

    /// Make the next `count` commits fail with a serialization error.
    pub fn fail_commits_with_serialization(&self, count: u32) {
        self.faults.serialization.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` commits fail with a non-retryable error.
    pub fn fail_commits(&self, count: u32) {
        self.faults.hard.store(count, Ordering::SeqCst);
    }
}

fn intents_of(tables: &Tables, booking_id: BookingId) -> Vec<PaymentIntent> {
    let mut intents: Vec<PaymentIntent> = tables
        .intents
        .values()
        .filter(|i| i.booking_id == booking_id)
        .cloned()
        .collect();
    intents.sort_by_key(|i| (i.created_at, i.order_reference.clone()));
    intents
}

fn ready<'a, T: Send + 'a>(result: Result<T, StoreError>) -> StoreFuture<'a, T> {
    Box::pin(std::future::ready(result))
}

impl BookingStore for MemoryBookingStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn BookingTx>> {
        Box::pin(async move {
            let guard = Arc::clone(&self.tables).lock_owned().await;
            let working = guard.clone();
            Ok(Box::new(MemoryTx {
                guard,
                working,
                faults: Arc::clone(&self.faults),
            }) as Box<dyn BookingTx>)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        ready(Ok(()))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    faults: Arc<Faults>,
}

impl BookingTx for MemoryTx {
    fn court_context(&mut self, court_id: CourtId) -> StoreFuture<'_, Option<CourtContext>> {
        let context = self.working.courts.get(&court_id).and_then(|court| {
            self.working.clubs.get(&court.club_id).map(|club| CourtContext {
                court: court.clone(),
                club: club.clone(),
            })
        });
        ready(Ok(context))
    }

    fn price_rules(&mut self, court_id: CourtId) -> StoreFuture<'_, Vec<PriceRule>> {
        let rules = self
            .working
            .price_rules
            .iter()
            .filter(|r| r.court_id == court_id)
            .cloned()
            .collect();
        ready(Ok(rules))
    }

    fn booking(&mut self, id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        ready(Ok(self.working.bookings.get(&id).cloned()))
    }

    fn overlapping_bookings(&mut self, court_id: CourtId, interval: Interval) -> StoreFuture<'_, Vec<Booking>> {
        let bookings = self
            .working
            .bookings
            .values()
            .filter(|b| {
                b.court_id == court_id
                    && b.status != ReservationStatus::Cancelled
                    && b.interval.overlaps(&interval)
            })
            .cloned()
            .collect();
        ready(Ok(bookings))
    }

    fn reservation_for_slot(
        &mut self,
        user_id: UserId,
        court_id: CourtId,
        interval: Interval,
    ) -> StoreFuture<'_, Option<Booking>> {
        let found = self
            .working
            .bookings
            .values()
            .filter(|b| {
                b.user_id == user_id
                    && b.court_id == court_id
                    && b.interval == interval
                    && b.status == ReservationStatus::Reserved
            })
            .max_by_key(|b| b.created_at)
            .cloned();
        ready(Ok(found))
    }

    fn insert_booking(&mut self, booking: &Booking) -> StoreFuture<'_, ()> {
        if self.working.bookings.contains_key(&booking.id) {
            return ready(Err(StoreError::Constraint("bookings_pkey".to_string())));
        }
        self.working.bookings.insert(booking.id, booking.clone());
        ready(Ok(()))
    }

    fn update_booking(&mut self, booking: &Booking) -> StoreFuture<'_, ()> {
        match self.working.bookings.get_mut(&booking.id) {
            Some(slot) => {
                *slot = booking.clone();
                ready(Ok(()))
            }
            None => ready(Err(StoreError::Corrupt(format!("booking {} vanished", booking.id)))),
        }
    }

    fn purgeable_reservations(&mut self, cutoff: DateTime<Utc>, limit: i64) -> StoreFuture<'_, Vec<Booking>> {
        let tables = &self.working;
        let mut stale: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| {
                b.status == ReservationStatus::Reserved
                    && b.reservation_expires_at.is_some_and(|at| at < cutoff)
                    && !tables
                        .intents
                        .values()
                        .any(|i| i.booking_id == b.id && !i.status.is_settled())
            })
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.reservation_expires_at);
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        ready(Ok(stale))
    }

    fn delete_booking(&mut self, id: BookingId) -> StoreFuture<'_, ()> {
        self.working.bookings.remove(&id);
        self.working.intents.retain(|_, i| i.booking_id != id);
        ready(Ok(()))
    }

    fn payment_accounts(
        &mut self,
        provider: ProviderKind,
        club_id: ClubId,
        organization_id: OrganizationId,
    ) -> StoreFuture<'_, Vec<PaymentAccount>> {
        let accounts = self
            .working
            .accounts
            .iter()
            .filter(|a| {
                a.provider == provider
                    && (a.owner == AccountOwner::Club(club_id)
                        || a.owner == AccountOwner::Organization(organization_id))
            })
            .cloned()
            .collect();
        ready(Ok(accounts))
    }

    fn payment_account(&mut self, id: PaymentAccountId) -> StoreFuture<'_, Option<PaymentAccount>> {
        ready(Ok(self.working.accounts.iter().find(|a| a.id == id).cloned()))
    }

    fn insert_intent(&mut self, intent: &PaymentIntent) -> StoreFuture<'_, ()> {
        if self
            .working
            .intents
            .values()
            .any(|i| i.order_reference == intent.order_reference)
        {
            return ready(Err(StoreError::Constraint(
                "payment_intents_order_reference_key".to_string(),
            )));
        }
        self.working.intents.insert(intent.id, intent.clone());
        ready(Ok(()))
    }

    fn update_intent(&mut self, intent: &PaymentIntent) -> StoreFuture<'_, ()> {
        match self.working.intents.get_mut(&intent.id) {
            Some(slot) => {
                *slot = intent.clone();
                ready(Ok(()))
            }
            None => ready(Err(StoreError::Corrupt(format!("intent {} vanished", intent.id)))),
        }
    }

    fn intent_by_reference(&mut self, order_reference: &str) -> StoreFuture<'_, Option<PaymentIntent>> {
        let found = self
            .working
            .intents
            .values()
            .find(|i| i.order_reference == order_reference)
            .cloned();
        ready(Ok(found))
    }

    fn intents_for_booking(&mut self, booking_id: BookingId) -> StoreFuture<'_, Vec<PaymentIntent>> {
        ready(Ok(intents_of(&self.working, booking_id)))
    }

    fn apply_statistic(&mut self, club_id: ClubId, date: NaiveDate, delta: StatisticDelta) -> StoreFuture<'_, ()> {
        let row = self
            .working
            .statistics
            .entry((club_id, date))
            .or_insert_with(|| ClubDailyStatistic::empty(club_id, date));
        row.bookings_created += delta.bookings_created;
        row.bookings_cancelled += delta.bookings_cancelled;
        row.revenue = row.revenue.saturating_add(delta.revenue);
        row.active_users += delta.active_users;
        ready(Ok(()))
    }

    fn mark_active_user(&mut self, club_id: ClubId, date: NaiveDate, user_id: UserId) -> StoreFuture<'_, bool> {
        ready(Ok(self.working.active_users.insert((club_id, date, user_id))))
    }

    fn statistic(&mut self, club_id: ClubId, date: NaiveDate) -> StoreFuture<'_, Option<ClubDailyStatistic>> {
        ready(Ok(self.working.statistics.get(&(club_id, date)).cloned()))
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        let Self {
            mut guard,
            working,
            faults,
        } = *self;
        if Faults::take(&faults.serialization) {
            return ready(Err(StoreError::Serialization));
        }
        if Faults::take(&faults.hard) {
            return ready(Err(StoreError::Unavailable("injected commit failure".to_string())));
        }
        *guard = working;
        ready(Ok(()))
    }
}
