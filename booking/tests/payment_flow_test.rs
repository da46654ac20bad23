//! Payment initiation and webhook reconciliation.
//!
//! Run with: `cargo test --test payment_flow_test`

#![allow(clippy::unwrap_used)]

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{at, harness, player, Harness, PROVIDER};
use courtside::notifier::BookingEventKind;
use courtside::notifier::court_topic;
use courtside::payments::SlotPayment;
use courtside::payments::providers::{ProviderError, ScriptedResponse};
use courtside::{
    Booking, BookingError, BookingId, ClubId, IntentStatus, Money, PaymentStatus, ProviderKind, ReservationStatus,
};
use courtside_web::Actor;

async fn reserve(h: &Harness, actor: &Actor, hour: u32) -> Booking {
    let user = courtside::UserId::from_uuid(actor.user_id);
    h.engine
        .create_booking(actor, h.request(user, at(hour, 0), at(hour + 1, 0)))
        .await
        .unwrap()
}

#[tokio::test]
async fn initiation_creates_pending_intent_with_checkout() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;

    let checkout = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();

    assert_eq!(checkout.booking_id, booking.id);
    assert_eq!(checkout.amount, booking.price);
    assert_eq!(checkout.currency, booking.currency);
    assert_eq!(checkout.checkout_url, format!("https://pay.test/{}", checkout.order_reference));

    let intents = h.store.intents_of(booking.id).await;
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].status, IntentStatus::Pending);
    assert_eq!(intents[0].account_id, h.account.id);
    assert_eq!(intents[0].checkout_url.as_deref(), Some(checkout.checkout_url.as_str()));

    let request = &h.provider.requests()[0];
    assert_eq!(request.order_reference, checkout.order_reference);
    assert!(request.callback_url.ends_with("/webhooks/wayforpay"));
}

#[tokio::test]
async fn successful_callback_marks_booking_paid_once() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    let checkout = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();

    let ack = h.callback(&checkout.order_reference, "succeeded").await.unwrap();
    assert_eq!(ack.status, StatusCode::OK);

    let paid = h.store.get_booking(booking.id).await.unwrap();
    assert_eq!(paid.status, ReservationStatus::Paid);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.reservation_expires_at, None);
    assert_eq!(h.statistic().await.revenue, booking.price);

    // Replay: acknowledged, nothing changes.
    let replay = h.callback(&checkout.order_reference, "succeeded").await.unwrap();
    assert_eq!(replay.status, StatusCode::OK);
    assert_eq!(h.statistic().await.revenue, booking.price);
    assert_eq!(h.store.get_booking(booking.id).await.unwrap(), paid);
    let intents = h.store.intents_of(booking.id).await;
    assert_eq!(intents[0].status, IntentStatus::Succeeded);
}

#[tokio::test]
async fn bad_signature_changes_nothing() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    let checkout = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();

    let forged = courtside::payments::providers::ScriptedProvider::callback_body(
        "not-the-secret",
        &checkout.order_reference,
        "succeeded",
    );
    let err = h
        .payments
        .reconcile(PROVIDER, &axum::http::HeaderMap::new(), &forged)
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::Provider(ProviderError::InvalidSignature)));
    assert_eq!(h.store.get_booking(booking.id).await.unwrap().status, ReservationStatus::Reserved);
    assert_eq!(h.store.intents_of(booking.id).await[0].status, IntentStatus::Pending);
}

#[tokio::test]
async fn unknown_order_reference_is_not_found() {
    let h = harness().await;
    let err = h.callback("no-such-order", "succeeded").await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound { .. }));
}

#[tokio::test]
async fn failed_callback_is_terminal() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    let checkout = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();

    h.callback(&checkout.order_reference, "failed").await.unwrap();
    assert_eq!(h.store.intents_of(booking.id).await[0].status, IntentStatus::Failed);
    assert_eq!(h.store.get_booking(booking.id).await.unwrap().status, ReservationStatus::Reserved);

    // A contradicting success for the same intent is ignored.
    h.callback(&checkout.order_reference, "succeeded").await.unwrap();
    assert_eq!(h.store.intents_of(booking.id).await[0].status, IntentStatus::Failed);
    assert_eq!(h.store.get_booking(booking.id).await.unwrap().status, ReservationStatus::Reserved);

    // The player can try again.
    let retry = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();
    h.callback(&retry.order_reference, "succeeded").await.unwrap();
    assert_eq!(h.store.get_booking(booking.id).await.unwrap().status, ReservationStatus::Paid);
}

#[tokio::test]
async fn unrecognised_status_is_acknowledged_without_change() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    let checkout = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();

    let ack = h.callback(&checkout.order_reference, "processing").await.unwrap();
    assert_eq!(ack.status, StatusCode::OK);
    assert_eq!(h.store.intents_of(booking.id).await[0].status, IntentStatus::Pending);
}

#[tokio::test]
async fn provider_timeout_leaves_intent_pending() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    h.provider.push(ScriptedResponse::Hang);

    let err = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap_err();
    assert!(matches!(err, BookingError::Provider(ProviderError::Timeout)));

    let intents = h.store.intents_of(booking.id).await;
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].status, IntentStatus::Pending);
    assert_eq!(intents[0].checkout_url, None);
    assert_eq!(h.store.get_booking(booking.id).await.unwrap().status, ReservationStatus::Reserved);
}

#[tokio::test]
async fn provider_http_error_surfaces_as_provider_error() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    h.provider.push(ScriptedResponse::Http(502));

    let err = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap_err();
    assert!(matches!(err, BookingError::Provider(ProviderError::Http { status: 502, .. })));
}

#[tokio::test]
async fn new_attempt_supersedes_pending_intent() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;

    let first = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();
    let second = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();
    assert_ne!(first.order_reference, second.order_reference);

    let intents = h.store.intents_of(booking.id).await;
    let status_of = |reference: &str| {
        intents
            .iter()
            .find(|i| i.order_reference == reference)
            .map(|i| i.status)
            .unwrap()
    };
    assert_eq!(status_of(&first.order_reference), IntentStatus::Expired);
    assert_eq!(status_of(&second.order_reference), IntentStatus::Pending);

    // A late success on the superseded attempt still pays the booking.
    h.callback(&first.order_reference, "succeeded").await.unwrap();
    assert_eq!(h.store.get_booking(booking.id).await.unwrap().status, ReservationStatus::Paid);
}

#[tokio::test]
async fn purge_keeps_bookings_with_an_unsettled_attempt() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    let superseded = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();
    let declined = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();
    h.callback(&declined.order_reference, "failed").await.unwrap();

    h.clock.advance(Duration::minutes(40));
    let purged = h.engine.purge_expired(h.engine.now(), 100).await.unwrap();
    assert_eq!(purged, 0);
    assert!(h.store.get_booking(booking.id).await.is_some());

    h.callback(&superseded.order_reference, "succeeded").await.unwrap();
    let paid = h.store.get_booking(booking.id).await.unwrap();
    assert_eq!(paid.status, ReservationStatus::Paid);
    assert_eq!(h.statistic().await.revenue, paid.price);
}

#[tokio::test]
async fn purge_removes_bookings_whose_attempts_all_failed() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    let declined = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();
    h.callback(&declined.order_reference, "failed").await.unwrap();

    h.clock.advance(Duration::minutes(40));
    let purged = h.engine.purge_expired(h.engine.now(), 100).await.unwrap();
    assert_eq!(purged, 1);
    assert!(h.store.get_booking(booking.id).await.is_none());

    let err = h.callback(&declined.order_reference, "succeeded").await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound { .. }));
}

#[tokio::test]
async fn lapsed_hold_can_still_be_paid_when_slot_is_free() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    h.clock.advance(Duration::minutes(40));

    let checkout = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();
    let refreshed = h.store.get_booking(booking.id).await.unwrap();
    assert_eq!(
        refreshed.reservation_expires_at,
        Some(common::start_of_test() + Duration::minutes(55))
    );

    h.callback(&checkout.order_reference, "succeeded").await.unwrap();
    assert_eq!(h.store.get_booking(booking.id).await.unwrap().status, ReservationStatus::Paid);
}

#[tokio::test]
async fn stale_reservation_cannot_be_paid_after_slot_was_taken() {
    let h = harness().await;
    let (_, first) = player();
    let (second_user, second) = player();
    let stale = reserve(&h, &first, 10).await;
    h.clock.advance(Duration::minutes(20));

    h.engine
        .create_booking(&second, h.request(second_user, at(10, 0), at(11, 0)))
        .await
        .unwrap();

    let err = h.payments.initiate(&first, stale.id, PROVIDER).await.unwrap_err();
    assert!(matches!(err, BookingError::SlotConflict { .. }));
    assert!(h.store.intents_of(stale.id).await.is_empty());
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn late_success_for_taken_slot_keeps_booking_reserved() {
    let h = harness().await;
    let (_, first) = player();
    let (second_user, second) = player();
    let booking = reserve(&h, &first, 10).await;
    let checkout = h.payments.initiate(&first, booking.id, PROVIDER).await.unwrap();

    h.clock.advance(Duration::minutes(20));
    let winner = h
        .engine
        .create_booking(&second, h.request(second_user, at(10, 0), at(11, 0)))
        .await
        .unwrap();

    let ack = h.callback(&checkout.order_reference, "succeeded").await.unwrap();
    assert_eq!(ack.status, StatusCode::OK);
    assert_eq!(h.store.intents_of(booking.id).await[0].status, IntentStatus::Succeeded);
    assert_eq!(h.store.get_booking(booking.id).await.unwrap().status, ReservationStatus::Reserved);
    assert_eq!(h.store.get_booking(winner.id).await.unwrap().status, ReservationStatus::Reserved);
    assert_eq!(h.statistic().await.revenue, Money::ZERO);
}

#[tokio::test]
async fn initiation_guards() {
    let h = harness().await;
    let (_, owner) = player();
    let (_, stranger) = player();
    let booking = reserve(&h, &owner, 10).await;

    let err = h.payments.initiate(&stranger, booking.id, PROVIDER).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    let err = h.payments.initiate(&owner, BookingId::new(), PROVIDER).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound { .. }));

    let err = h
        .payments
        .initiate(&owner, booking.id, ProviderKind::Stripe)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::PaymentUnavailable(_)));

    let checkout = h.payments.initiate(&owner, booking.id, PROVIDER).await.unwrap();
    h.callback(&checkout.order_reference, "succeeded").await.unwrap();
    let err = h.payments.initiate(&owner, booking.id, PROVIDER).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::AlreadyFinalized {
            status: ReservationStatus::Paid,
            ..
        }
    ));
}

#[tokio::test]
async fn started_slot_cannot_be_paid() {
    let h = harness().await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;
    h.clock.set(at(10, 5));

    let err = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap_err();
    assert!(matches!(err, BookingError::PaymentUnavailable(_)));
}

#[tokio::test]
async fn unusable_account_makes_payment_unavailable() {
    let h = harness().await;
    let mut disabled = h.account.clone();
    disabled.active = false;
    h.store.put_payment_account(disabled).await;
    let (_, actor) = player();
    let booking = reserve(&h, &actor, 10).await;

    let err = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap_err();
    assert!(matches!(err, BookingError::PaymentUnavailable(_)));
}

#[tokio::test]
async fn slot_initiation_reuses_existing_reservation() {
    let h = harness().await;
    let (_, actor) = player();
    let slot = SlotPayment {
        club_id: h.club.id,
        court_id: h.court.id,
        start_at: at(16, 0),
        end_at: at(17, 0),
    };

    let first = h.payments.initiate_for_slot(&actor, slot.clone(), PROVIDER).await.unwrap();
    let second = h.payments.initiate_for_slot(&actor, slot, PROVIDER).await.unwrap();

    assert_eq!(first.booking_id, second.booking_id);
    assert_eq!(h.store.bookings_on(h.court.id).await.len(), 1);
}

#[tokio::test]
async fn slot_initiation_checks_club_and_conflicts() {
    let h = harness().await;
    let (_, actor) = player();
    let (_, other) = player();

    let wrong_club = SlotPayment {
        club_id: ClubId::new(),
        court_id: h.court.id,
        start_at: at(16, 0),
        end_at: at(17, 0),
    };
    let err = h.payments.initiate_for_slot(&actor, wrong_club, PROVIDER).await.unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let slot = SlotPayment {
        club_id: h.club.id,
        court_id: h.court.id,
        start_at: at(16, 0),
        end_at: at(17, 0),
    };
    h.payments.initiate_for_slot(&actor, slot.clone(), PROVIDER).await.unwrap();
    let err = h.payments.initiate_for_slot(&other, slot, PROVIDER).await.unwrap_err();
    assert!(matches!(err, BookingError::SlotConflict { .. }));
}

#[tokio::test]
async fn subscribers_see_created_updated_and_paid() {
    let h = harness().await;
    let mut rx = h.notifier.topics().subscribe(court_topic(h.court.id)).await;
    let (_, actor) = player();

    let booking = reserve(&h, &actor, 10).await;
    let checkout = h.payments.initiate(&actor, booking.id, PROVIDER).await.unwrap();
    h.callback(&checkout.order_reference, "succeeded").await.unwrap();

    let (_, created) = rx.recv().await.unwrap();
    let (_, refreshed) = rx.recv().await.unwrap();
    let (_, paid) = rx.recv().await.unwrap();

    assert_eq!(created.event, BookingEventKind::BookingCreated);
    assert_eq!(created.booking_id, booking.id);
    assert_eq!(refreshed.event, BookingEventKind::BookingUpdated);
    assert_eq!(paid.event, BookingEventKind::BookingUpdated);
    assert_eq!(paid.status, ReservationStatus::Paid);
    assert_eq!(paid.club_id, h.club.id);
}
