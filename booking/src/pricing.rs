//! Price resolution.
//!
//! Court prices are hourly rates. A slot is priced with the most specific
//! [`PriceRule`] whose window fully contains it on the club's local clock, or
//! with the court's default rate when no rule matches:
//!
//! 1. the rule must apply on the slot's local date (weekday and validity range)
//! 2. its `[start_time, end_time)` window must contain the whole slot
//! 3. among matches the narrowest window wins, then the newest rule
//!
//! A window with `end_time` before `start_time` runs past midnight into the
//! next day, e.g. `22:00-02:00`. Such a rule belongs to the date its window
//! opens on, so a `00:30` slot on Tuesday is priced by Monday's night rule.
//! An `end_time` of `00:00` means end of day, and a window whose start equals
//! its (non-midnight) end never matches.
//!
//! The total is `rate * minutes / 60`, rounded half up to a minor unit.

use crate::error::BookingError;
use crate::store::BookingTx;
use crate::types::{CourtContext, CourtId, Currency, Money, PriceRule, PriceRuleId};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// A resolved price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    /// Court priced
    pub court_id: CourtId,
    /// Total for the slot
    pub price: Money,
    /// Hourly rate applied
    pub hourly_rate: Money,
    /// Currency
    pub currency: Currency,
    /// Slot length
    pub duration_minutes: i64,
    /// Matching rule, `None` when the default rate applied
    pub rule_id: Option<PriceRuleId>,
}

/// Local clock time of `at` at the club's UTC offset.
///
/// # Errors
///
/// Returns [`BookingError::Internal`] when the club carries an impossible offset.
pub fn local_time(at: DateTime<Utc>, utc_offset_minutes: i32) -> Result<DateTime<FixedOffset>, BookingError> {
    let offset = utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| BookingError::Internal(format!("invalid club UTC offset {utc_offset_minutes}")))?;
    Ok(at.with_timezone(&offset))
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Window of a rule in minutes from the local midnight of the date it opens
/// on. The end may exceed a day for windows crossing midnight.
fn window(rule: &PriceRule) -> Option<(u32, u32)> {
    let start = minute_of_day(rule.start_time);
    let end = match minute_of_day(rule.end_time) {
        0 => MINUTES_PER_DAY,
        m if m < start => m + MINUTES_PER_DAY,
        m => m,
    };
    (start < end).then_some((start, end))
}

fn applies_on(rule: &PriceRule, date: NaiveDate) -> bool {
    (rule.days_of_week.is_empty() || rule.days_of_week.contains(&date.weekday()))
        && rule.valid_from.is_none_or(|from| from <= date)
        && rule.valid_until.is_none_or(|until| date <= until)
}

/// Pick the rule pricing a local slot `[slot_start, slot_end)` (minutes from
/// midnight of `date`, the end past a day for slots crossing midnight).
#[must_use]
pub fn select_rule(rules: &[PriceRule], date: NaiveDate, slot_start: u32, slot_end: u32) -> Option<&PriceRule> {
    let day = i64::from(MINUTES_PER_DAY);
    let (slot_start, slot_end) = (i64::from(slot_start), i64::from(slot_end));
    let previous = date.pred_opt();

    rules
        .iter()
        .filter_map(|rule| {
            let (start, end) = window(rule)?;
            let (start, end) = (i64::from(start), i64::from(end));
            let same_day = applies_on(rule, date) && start <= slot_start && slot_end <= end;
            // Window opened the day before and is still running.
            let carried_over = end > day
                && previous.is_some_and(|prev| applies_on(rule, prev))
                && start - day <= slot_start
                && slot_end <= end - day;
            (same_day || carried_over).then_some((end - start, rule))
        })
        .min_by_key(|(width, rule)| (*width, Reverse(rule.created_at), rule.id))
        .map(|(_, rule)| rule)
}

/// Total for `minutes` at an hourly `rate`, rounded half up.
#[must_use]
pub fn prorate(rate: Money, minutes: i64) -> Money {
    let cents = (i128::from(rate.cents()) * i128::from(minutes) + 30) / 60;
    Money::from_cents(i64::try_from(cents).unwrap_or(i64::MAX))
}

/// Price a slot starting at `start` for `duration_minutes`.
///
/// # Errors
///
/// Returns [`BookingError::Validation`] for a non-positive duration.
pub fn resolve(
    context: &CourtContext,
    rules: &[PriceRule],
    start: DateTime<Utc>,
    duration_minutes: i64,
) -> Result<PriceQuote, BookingError> {
    if duration_minutes <= 0 {
        return Err(BookingError::Validation("duration must be positive".to_string()));
    }

    let local = local_time(start, context.club.utc_offset_minutes)?;
    let slot_start = minute_of_day(local.time());
    let slot_end = u32::try_from(duration_minutes)
        .ok()
        .and_then(|d| slot_start.checked_add(d));

    let rule = slot_end.and_then(|end| select_rule(rules, local.date_naive(), slot_start, end));
    let hourly_rate = rule.map_or(context.court.default_price, |r| r.price);

    tracing::debug!(
        court_id = %context.court.id,
        rule_id = ?rule.map(|r| r.id),
        hourly_rate = hourly_rate.cents(),
        duration_minutes,
        "Price resolved"
    );

    Ok(PriceQuote {
        court_id: context.court.id,
        price: prorate(hourly_rate, duration_minutes),
        hourly_rate,
        currency: context.club.currency.clone(),
        duration_minutes,
        rule_id: rule.map(|r| r.id),
    })
}

/// Resolve a price inside an open transaction.
///
/// # Errors
///
/// [`BookingError::NotFound`] when the court does not exist, or store errors.
pub async fn resolve_in(
    tx: &mut dyn BookingTx,
    court_id: CourtId,
    start: DateTime<Utc>,
    duration_minutes: i64,
) -> Result<PriceQuote, BookingError> {
    let context = tx
        .court_context(court_id)
        .await?
        .ok_or_else(|| BookingError::not_found("Court", court_id))?;
    let rules = tx.price_rules(court_id).await?;
    resolve(&context, &rules, start, duration_minutes)
}
