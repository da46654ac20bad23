//! Daily club statistics maintained alongside booking writes.

#![allow(clippy::unwrap_used)]

mod common;

use chrono::NaiveDate;
use common::{at, harness, player, PROVIDER};
use courtside::store::StoreError;
use courtside::{BookingError, Money};

#[tokio::test]
async fn each_reservation_is_counted() {
    let h = harness().await;
    for hour in 9..14 {
        let (user, actor) = player();
        h.engine
            .create_booking(&actor, h.request(user, at(hour, 0), at(hour + 1, 0)))
            .await
            .unwrap();
    }

    let stats = h.statistic().await;
    assert_eq!(stats.bookings_created, 5);
    assert_eq!(stats.active_users, 5);
    assert_eq!(stats.bookings_cancelled, 0);
    assert_eq!(stats.revenue, Money::ZERO);
}

#[tokio::test]
async fn returning_player_is_one_active_user() {
    let h = harness().await;
    let (user, actor) = player();
    for hour in [9, 12, 15] {
        h.engine
            .create_booking(&actor, h.request(user, at(hour, 0), at(hour + 1, 0)))
            .await
            .unwrap();
    }

    let stats = h.statistic().await;
    assert_eq!(stats.bookings_created, 3);
    assert_eq!(stats.active_users, 1);
}

#[tokio::test]
async fn failed_commit_leaves_no_trace() {
    let h = harness().await;
    h.store.fail_commits(1);
    let (user, actor) = player();

    let err = h
        .engine
        .create_booking(&actor, h.request(user, at(10, 0), at(11, 0)))
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::Store(StoreError::Unavailable(_))));
    assert!(h.store.bookings_on(h.court.id).await.is_empty());
    assert_eq!(h.statistic().await.bookings_created, 0);

    // The counter moves once the write goes through.
    h.engine
        .create_booking(&actor, h.request(user, at(10, 0), at(11, 0)))
        .await
        .unwrap();
    assert_eq!(h.statistic().await.bookings_created, 1);
    assert_eq!(h.statistic().await.active_users, 1);
}

#[tokio::test]
async fn cancellations_and_revenue_land_on_the_start_date() {
    let h = harness().await;
    let (user, actor) = player();

    let cancelled = h
        .engine
        .create_booking(&actor, h.request(user, at(9, 0), at(10, 0)))
        .await
        .unwrap();
    h.engine.cancel(&actor, cancelled.id).await.unwrap();

    let paid = h
        .engine
        .create_booking(&actor, h.request(user, at(11, 0), at(12, 30)))
        .await
        .unwrap();
    let checkout = h.payments.initiate(&actor, paid.id, PROVIDER).await.unwrap();
    h.callback(&checkout.order_reference, "succeeded").await.unwrap();

    let stats = h.statistic().await;
    assert_eq!(stats.bookings_created, 2);
    assert_eq!(stats.bookings_cancelled, 1);
    assert_eq!(stats.revenue, Money::from_cents(7500));
}

#[tokio::test]
async fn overnight_slot_counts_on_both_days() {
    let h = harness().await;
    let (user, actor) = player();
    h.engine
        .create_booking(&actor, h.request(user, at(23, 0), at(23, 0) + chrono::Duration::hours(2)))
        .await
        .unwrap();

    let next_day = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap();
    let first = h.statistic().await;
    let second = h.store.get_statistic(h.club.id, next_day).await.unwrap();
    assert_eq!(first.bookings_created, 1);
    assert_eq!(second.bookings_created, 1);
    assert_eq!(second.active_users, 1);
}
