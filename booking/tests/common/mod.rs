//! Shared fixture for integration tests: one club with one court, a verified
//! payment account and a scripted provider, on a manual clock.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use courtside::engine::{BookingEngine, CreateBooking, EngineSettings};
use courtside::lifecycle::BookingEnvironment;
use courtside::notifier::BroadcastNotifier;
use courtside::payments::providers::{ProviderRegistry, ScriptedProvider, WebhookAck};
use courtside::payments::{PaymentOrchestrator, PaymentSettings};
use courtside::store::MemoryBookingStore;
use courtside::{
    AccountOwner, BookingError, Club, ClubId, Court, CourtId, Currency, Money, OrganizationId, PaymentAccount,
    PaymentAccountId, ProviderKind, Secret, UserId,
};
use courtside_runtime::retry::RetryPolicy;
use courtside_testing::ManualClock;
use courtside_web::Actor;
use std::sync::Arc;

/// Callback secret of the fixture's payment account.
pub const WEBHOOK_SECRET: &str = "whsec_fixture";

/// Provider the scripted double is registered as.
pub const PROVIDER: ProviderKind = ProviderKind::Wayforpay;

/// Monday 2025-03-10 08:00 UTC.
pub fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
}

/// `hh:mm` on the fixture day.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
}

pub struct Harness {
    pub store: MemoryBookingStore,
    pub clock: ManualClock,
    pub notifier: BroadcastNotifier,
    pub engine: BookingEngine,
    pub payments: PaymentOrchestrator,
    pub provider: ScriptedProvider,
    pub club: Club,
    pub court: Court,
    pub account: PaymentAccount,
}

pub async fn harness() -> Harness {
    let clock = ManualClock::starting_at(start_of_test());
    let store = MemoryBookingStore::new();

    let club = Club {
        id: ClubId::new(),
        organization_id: OrganizationId::new(),
        name: "Riverside Padel".to_string(),
        utc_offset_minutes: 0,
        currency: Currency::parse("UAH").unwrap(),
    };
    let court = Court {
        id: CourtId::new(),
        club_id: club.id,
        name: "Court 1".to_string(),
        sport_type: "padel".to_string(),
        default_price: Money::from_cents(5000),
        active: true,
    };
    let account = PaymentAccount {
        id: PaymentAccountId::new(),
        provider: PROVIDER,
        owner: AccountOwner::Club(club.id),
        merchant_id: "riverside".to_string(),
        secret_key: Secret::new("merchant-secret"),
        webhook_secret: Some(Secret::new(WEBHOOK_SECRET)),
        verified: true,
        active: true,
        created_at: start_of_test() - Duration::days(30),
    };
    store.put_club(club.clone()).await;
    store.put_court(court.clone()).await;
    store.put_payment_account(account.clone()).await;

    let notifier = BroadcastNotifier::default();
    let env = BookingEnvironment::new(
        Arc::new(clock.clone()),
        Arc::new(notifier.clone()),
        Duration::minutes(15),
    );
    let settings = EngineSettings {
        retry: RetryPolicy::builder()
            .max_retries(8)
            .initial_delay(std::time::Duration::from_millis(1))
            .max_delay(std::time::Duration::from_millis(5))
            .build(),
        ..EngineSettings::default()
    };
    let engine = BookingEngine::new(Arc::new(store.clone()), env, settings);

    let provider = ScriptedProvider::new(PROVIDER);
    let registry = ProviderRegistry::new().with(Arc::new(provider.clone()));
    let payments = PaymentOrchestrator::new(
        engine.clone(),
        registry,
        PaymentSettings {
            provider_timeout: std::time::Duration::from_millis(200),
            ..PaymentSettings::default()
        },
    );

    Harness {
        store,
        clock,
        notifier,
        engine,
        payments,
        provider,
        club,
        court,
        account,
    }
}

/// A fresh player.
pub fn player() -> (UserId, Actor) {
    let user = UserId::new();
    (user, Actor::player(*user.as_uuid()))
}

impl Harness {
    /// Booking request for `user` on the fixture court.
    pub fn request(&self, user: UserId, start: DateTime<Utc>, end: DateTime<Utc>) -> CreateBooking {
        CreateBooking {
            court_id: self.court.id,
            user_id: user,
            coach_id: None,
            start_time: start,
            end_time: end,
        }
    }

    /// Deliver a correctly signed scripted callback.
    pub async fn callback(&self, order_reference: &str, status: &str) -> Result<WebhookAck, BookingError> {
        let body = ScriptedProvider::callback_body(WEBHOOK_SECRET, order_reference, status);
        self.payments
            .reconcile(PROVIDER, &axum::http::HeaderMap::new(), &body)
            .await
    }

    /// Statistic of the fixture club on the fixture day.
    pub async fn statistic(&self) -> courtside::ClubDailyStatistic {
        let date = start_of_test().date_naive();
        self.store
            .get_statistic(self.club.id, date)
            .await
            .unwrap_or_else(|| courtside::ClubDailyStatistic::empty(self.club.id, date))
    }
}
