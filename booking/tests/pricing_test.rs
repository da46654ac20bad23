//! Price resolution through the booking path.

#![allow(clippy::unwrap_used)]

mod common;

use chrono::{NaiveTime, Utc};
use common::{at, harness, player, Harness};
use courtside::{BookingError, CourtId, Money, PriceRule, PriceRuleId};

fn afternoon_rule(h: &Harness, from: u32, to: u32, cents: i64) -> PriceRule {
    PriceRule {
        id: PriceRuleId::new(),
        court_id: h.court.id,
        days_of_week: Vec::new(),
        valid_from: None,
        valid_until: None,
        start_time: NaiveTime::from_hms_opt(from, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(to, 0, 0).unwrap(),
        price: Money::from_cents(cents),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn booking_price_follows_rule_window() {
    let h = harness().await;
    h.store.put_price_rule(afternoon_rule(&h, 12, 18, 7000)).await;
    let (user, actor) = player();

    let afternoon = h
        .engine
        .create_booking(&actor, h.request(user, at(13, 0), at(14, 0)))
        .await
        .unwrap();
    let morning = h
        .engine
        .create_booking(&actor, h.request(user, at(9, 0), at(10, 0)))
        .await
        .unwrap();

    assert_eq!(afternoon.price, Money::from_cents(7000));
    assert_eq!(morning.price, Money::from_cents(5000));
    assert_eq!(afternoon.currency, h.club.currency);
}

#[tokio::test]
async fn narrower_rule_wins_whatever_the_insertion_order() {
    for narrow_first in [true, false] {
        let h = harness().await;
        let broad = afternoon_rule(&h, 8, 22, 6000);
        let narrow = afternoon_rule(&h, 12, 14, 9000);
        if narrow_first {
            h.store.put_price_rule(narrow.clone()).await;
            h.store.put_price_rule(broad).await;
        } else {
            h.store.put_price_rule(broad).await;
            h.store.put_price_rule(narrow.clone()).await;
        }

        let quote = h.engine.quote(h.court.id, at(12, 0), at(13, 0)).await.unwrap();
        assert_eq!(quote.price, Money::from_cents(9000));
        assert_eq!(quote.rule_id, Some(narrow.id));
    }
}

#[tokio::test]
async fn quote_matches_reserved_price() {
    let h = harness().await;
    h.store.put_price_rule(afternoon_rule(&h, 12, 18, 7000)).await;
    let (user, actor) = player();

    let quote = h.engine.quote(h.court.id, at(12, 0), at(13, 30)).await.unwrap();
    let booking = h
        .engine
        .create_booking(&actor, h.request(user, at(12, 0), at(13, 30)))
        .await
        .unwrap();

    assert_eq!(quote.duration_minutes, 90);
    assert_eq!(quote.price, Money::from_cents(10_500));
    assert_eq!(booking.price, quote.price);
}

#[tokio::test]
async fn quote_for_unknown_court_is_not_found() {
    let h = harness().await;
    let err = h.engine.quote(CourtId::new(), at(12, 0), at(13, 0)).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound { .. }));
}
