//! Payment intent orchestration.
//!
//! Initiation runs in three steps so no transaction stays open across the
//! provider call:
//!
//! 1. One transaction validates the booking, resolves the account, re-checks
//!    the slot when the hold lapsed, refreshes the hold, expires older pending
//!    intents and inserts a new `pending` intent.
//! 2. The provider call runs under a timeout. A failure leaves the intent
//!    `pending` and surfaces as [`BookingError::Provider`].
//! 3. A second transaction stores the checkout URL on the intent.
//!
//! Reconciliation verifies the callback against the intent's account before
//! touching anything, then moves the intent and the booking together in one
//! transaction. Replays find the intent already settled and change nothing.

pub mod accounts;
pub mod providers;

use crate::conflict;
use crate::engine::{BookingEngine, CreateBooking};
use crate::error::BookingError;
use crate::lifecycle::{BookingAction, BookingEffects};
use crate::statistics;
use crate::types::{
    order_reference, Booking, BookingId, ClubId, CourtId, Currency, IntentStatus, Interval, Money, PaymentAccount,
    PaymentIntent, PaymentIntentId, ProviderKind, ReservationStatus, UserId,
};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use courtside_web::Actor;
use providers::{CallbackOutcome, CheckoutRequest, ProviderError, ProviderRegistry, WebhookAck};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Tunables of the payment flow.
#[derive(Clone, Debug)]
pub struct PaymentSettings {
    /// Bound on each provider call
    pub provider_timeout: Duration,
    /// Public base URL providers post callbacks to
    pub callback_base_url: String,
    /// Page the payer returns to
    pub return_url: String,
    /// Shop domain registered with providers
    pub merchant_domain: String,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(15),
            callback_base_url: "http://localhost:8080".to_string(),
            return_url: "http://localhost:8080/payments/return".to_string(),
            merchant_domain: "localhost".to_string(),
        }
    }
}

/// Payment initiation for a whole slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotPayment {
    /// Club the court belongs to
    pub club_id: ClubId,
    /// Court
    pub court_id: CourtId,
    /// Slot start
    pub start_at: DateTime<Utc>,
    /// Slot end
    pub end_at: DateTime<Utc>,
}

/// Hosted checkout handed back to the payer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCheckout {
    /// Page to redirect the payer to
    pub checkout_url: String,
    /// Booking being paid
    pub booking_id: BookingId,
    /// Intent tracking the attempt
    pub payment_intent_id: PaymentIntentId,
    /// Reference shared with the provider
    pub order_reference: String,
    /// Amount in minor units
    pub amount: Money,
    /// Currency
    pub currency: Currency,
}

/// Intent prepared by the first initiation transaction.
struct PreparedIntent {
    intent: PaymentIntent,
    account: PaymentAccount,
    description: String,
    effects: BookingEffects,
}

/// Changes applied by one callback.
struct Reconciled {
    account: PaymentAccount,
    intent_status: Option<IntentStatus>,
    revenue: Option<Money>,
    effects: BookingEffects,
}

/// Creates payment intents and applies provider callbacks.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    engine: BookingEngine,
    providers: ProviderRegistry,
    settings: PaymentSettings,
}

impl PaymentOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub const fn new(engine: BookingEngine, providers: ProviderRegistry, settings: PaymentSettings) -> Self {
        Self {
            engine,
            providers,
            settings,
        }
    }

    /// Start paying for a reserved booking.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`]: unknown booking
    /// - [`BookingError::Forbidden`]: booking of another user
    /// - [`BookingError::AlreadyFinalized`]: booking paid or cancelled
    /// - [`BookingError::PaymentUnavailable`]: slot already started, provider
    ///   disabled, or no usable account
    /// - [`BookingError::SlotConflict`]: the hold lapsed and the slot was taken
    /// - [`BookingError::Provider`]: checkout creation failed; the intent
    ///   stays `pending`
    #[tracing::instrument(skip(self, actor), fields(booking_id = %booking_id, provider = %provider))]
    pub async fn initiate(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        provider: ProviderKind,
    ) -> Result<PaymentCheckout, BookingError> {
        let adapter = self
            .providers
            .get(provider)
            .ok_or_else(|| BookingError::PaymentUnavailable(format!("{provider} payments are not enabled")))?;

        let prepared = self
            .engine
            .in_transaction(move || async move {
                let mut tx = self.engine.store().begin().await?;
                let prepared = self.prepare_intent(tx.as_mut(), actor, booking_id, provider).await?;
                tx.commit().await?;
                Ok(prepared)
            })
            .await?;

        let PreparedIntent {
            intent,
            account,
            description,
            effects,
        } = prepared;
        crate::metrics::record_intent(IntentStatus::Pending);
        tracing::info!(
            order_reference = %intent.order_reference,
            amount = intent.amount.cents(),
            "Payment intent created"
        );
        courtside_runtime::execute(effects).await;

        let request = CheckoutRequest {
            booking_id,
            order_reference: intent.order_reference.clone(),
            amount: intent.amount,
            currency: intent.currency.clone(),
            description,
            callback_url: format!("{}/webhooks/{provider}", self.settings.callback_base_url.trim_end_matches('/')),
            return_url: format!("{}?bookingId={booking_id}", self.settings.return_url),
            merchant_domain: self.settings.merchant_domain.clone(),
            created_at: intent.created_at,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.settings.provider_timeout, adapter.create_checkout(&account, &request))
            .await
            .unwrap_or(Err(ProviderError::Timeout));
        crate::metrics::record_provider_call(provider, started.elapsed().as_secs_f64(), outcome.is_err());
        let session = outcome.map_err(|err| {
            tracing::warn!(
                order_reference = %intent.order_reference,
                error = %err,
                "Checkout creation failed, intent left pending"
            );
            BookingError::Provider(err)
        })?;

        let reference = intent.order_reference.as_str();
        let checkout_url = session.checkout_url.as_str();
        let provider_reference = session.provider_reference.as_deref();
        self.engine
            .in_transaction(move || async move {
                let mut tx = self.engine.store().begin().await?;
                let mut stored = tx
                    .intent_by_reference(reference)
                    .await?
                    .ok_or_else(|| BookingError::Internal(format!("intent {reference} vanished")))?;
                stored.checkout_url = Some(checkout_url.to_string());
                stored.provider_reference = provider_reference.map(str::to_string);
                stored.updated_at = self.engine.now();
                tx.update_intent(&stored).await?;
                tx.commit().await?;
                Ok(())
            })
            .await?;

        Ok(PaymentCheckout {
            checkout_url: session.checkout_url,
            booking_id,
            payment_intent_id: intent.id,
            order_reference: intent.order_reference,
            amount: intent.amount,
            currency: intent.currency,
        })
    }

    async fn prepare_intent(
        &self,
        tx: &mut dyn crate::store::BookingTx,
        actor: &Actor,
        booking_id: BookingId,
        provider: ProviderKind,
    ) -> Result<PreparedIntent, BookingError> {
        let now = self.engine.now();
        let booking = tx
            .booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found("Booking", booking_id))?;
        if *booking.user_id.as_uuid() != actor.user_id {
            return Err(BookingError::Forbidden("booking belongs to another user".to_string()));
        }
        if booking.status != ReservationStatus::Reserved {
            return Err(BookingError::AlreadyFinalized {
                booking_id,
                status: booking.status,
            });
        }
        if booking.interval.start() <= now {
            return Err(BookingError::PaymentUnavailable("the booked slot has already started".to_string()));
        }

        let context = tx
            .court_context(booking.court_id)
            .await?
            .ok_or_else(|| BookingError::Internal(format!("booking {booking_id} references a missing court")))?;
        let account = accounts::resolve_account(tx, provider, &context.club).await?;

        if booking.hold_lapsed(now) {
            tracing::debug!("Hold lapsed, re-checking slot");
            conflict::ensure_free(tx, booking.court_id, &booking.interval, Some(booking_id), now).await?;
        }

        let (refreshed, effects) = self.engine.transition(Some(booking), BookingAction::RefreshHold)?;
        let booking = refreshed.ok_or_else(|| BookingError::Internal("hold refresh produced no booking".to_string()))?;
        tx.update_booking(&booking).await?;

        let previous_intents = tx.intents_for_booking(booking_id).await?;
        let reference = next_order_reference(booking_id, now, &previous_intents);
        for mut previous in previous_intents {
            if previous.status == IntentStatus::Pending {
                previous.status = IntentStatus::Expired;
                previous.updated_at = now;
                tx.update_intent(&previous).await?;
                crate::metrics::record_intent(IntentStatus::Expired);
                tracing::debug!(order_reference = %previous.order_reference, "Superseded pending intent");
            }
        }

        let intent = PaymentIntent {
            id: PaymentIntentId::new(),
            booking_id,
            account_id: account.id,
            provider,
            order_reference: reference,
            amount: booking.price,
            currency: booking.currency.clone(),
            status: IntentStatus::Pending,
            checkout_url: None,
            provider_reference: None,
            created_at: now,
            updated_at: now,
        };
        tx.insert_intent(&intent).await?;

        Ok(PreparedIntent {
            intent,
            account,
            description: describe(&context.court.name, &booking),
            effects,
        })
    }

    /// Start paying for a slot, reusing the caller's reservation on it or
    /// reserving it first.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for a bad interval or a court outside the
    /// club, [`BookingError::NotFound`] for an unknown court, then everything
    /// [`BookingEngine::create_booking`] and [`Self::initiate`] return.
    pub async fn initiate_for_slot(
        &self,
        actor: &Actor,
        slot: SlotPayment,
        provider: ProviderKind,
    ) -> Result<PaymentCheckout, BookingError> {
        let interval = Interval::new(slot.start_at, slot.end_at)
            .ok_or_else(|| BookingError::Validation("endAt must be after startAt".to_string()))?;

        let mut tx = self.engine.store().begin().await?;
        let context = tx.court_context(slot.court_id).await?;
        drop(tx);
        let context = context.ok_or_else(|| BookingError::not_found("Court", slot.court_id))?;
        if context.club.id != slot.club_id {
            return Err(BookingError::Validation("court does not belong to this club".to_string()));
        }

        let booking = match self.engine.reservation_for_slot(actor, slot.court_id, interval).await? {
            Some(existing) => {
                tracing::debug!(booking_id = %existing.id, "Resuming reservation for slot");
                existing
            }
            None => {
                let request = CreateBooking {
                    court_id: slot.court_id,
                    user_id: UserId::from_uuid(actor.user_id),
                    coach_id: None,
                    start_time: slot.start_at,
                    end_time: slot.end_at,
                };
                self.engine.create_booking(actor, request).await?
            }
        };

        self.initiate(actor, booking.id, provider).await
    }

    /// Apply a provider callback.
    ///
    /// Returns the acknowledgement the provider expects.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`]: provider not enabled or unknown order reference
    /// - [`ProviderError::MalformedCallback`] / [`ProviderError::InvalidSignature`]
    ///   (as [`BookingError::Provider`]): nothing was changed
    #[tracing::instrument(
        skip(self, headers, body),
        fields(provider = %provider, order_reference = tracing::field::Empty)
    )]
    pub async fn reconcile(
        &self,
        provider: ProviderKind,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookAck, BookingError> {
        let adapter = self
            .providers
            .get(provider)
            .ok_or_else(|| BookingError::not_found("Payment provider", provider))?;
        let callback = adapter.parse_callback(headers, body)?;
        tracing::Span::current().record("order_reference", callback.order_reference.as_str());

        let adapter_ref = adapter.as_ref();
        let callback_ref = &callback;
        let reconciled = self
            .engine
            .in_transaction(move || async move {
                let mut tx = self.engine.store().begin().await?;
                let now = self.engine.now();

                let Some(mut intent) = tx.intent_by_reference(&callback_ref.order_reference).await? else {
                    if matches!(callback_ref.outcome, CallbackOutcome::Succeeded) {
                        tracing::warn!(
                            order_reference = %callback_ref.order_reference,
                            "Payment succeeded for an unknown order, refund may be required"
                        );
                    }
                    return Err(BookingError::not_found("Payment intent", &callback_ref.order_reference));
                };
                let account = tx
                    .payment_account(intent.account_id)
                    .await?
                    .ok_or_else(|| BookingError::Internal(format!("intent {} has no account", intent.id)))?;
                if let Err(err) = adapter_ref.verify_callback(&account, callback_ref) {
                    tracing::warn!(order_reference = %intent.order_reference, "Rejected callback with bad signature");
                    return Err(err.into());
                }

                let mut reconciled = Reconciled {
                    account,
                    intent_status: None,
                    revenue: None,
                    effects: BookingEffects::new(),
                };

                let target = match &callback_ref.outcome {
                    CallbackOutcome::Ignored { status } => {
                        tracing::debug!(%status, "Callback status needs no action");
                        return Ok(reconciled);
                    }
                    CallbackOutcome::Succeeded => IntentStatus::Succeeded,
                    CallbackOutcome::Failed { reason } => {
                        tracing::info!(order_reference = %intent.order_reference, %reason, "Provider reported failure");
                        IntentStatus::Failed
                    }
                };
                if intent.status.is_settled() {
                    if intent.status != target {
                        tracing::warn!(
                            order_reference = %intent.order_reference,
                            current = %intent.status,
                            reported = %target,
                            "Callback contradicts a settled intent, ignoring"
                        );
                    }
                    return Ok(reconciled);
                }

                intent.status = target;
                intent.updated_at = now;
                tx.update_intent(&intent).await?;
                reconciled.intent_status = Some(target);

                if target == IntentStatus::Succeeded {
                    let booking = tx
                        .booking(intent.booking_id)
                        .await?
                        .ok_or_else(|| BookingError::Internal(format!("intent {} has no booking", intent.id)))?;
                    if let Some((paid, effects)) = self.settle(tx.as_mut(), booking, &intent, now).await? {
                        statistics::record_payment(tx.as_mut(), &paid, intent.amount).await?;
                        reconciled.revenue = Some(intent.amount);
                        reconciled.effects = effects;
                    }
                }

                tx.commit().await?;
                Ok(reconciled)
            })
            .await?;

        if let Some(status) = reconciled.intent_status {
            crate::metrics::record_intent(status);
            tracing::info!(order_reference = %callback.order_reference, status = %status, "Payment intent settled");
        }
        if let Some(revenue) = reconciled.revenue {
            crate::metrics::record_booking("paid");
            crate::metrics::record_revenue(revenue);
        }
        courtside_runtime::execute(reconciled.effects).await;

        Ok(adapter.acknowledge(&reconciled.account, &callback, self.engine.now()))
    }

    /// Move the booking of a succeeded intent to `paid`, when it still can be.
    async fn settle(
        &self,
        tx: &mut dyn crate::store::BookingTx,
        booking: Booking,
        intent: &PaymentIntent,
        now: DateTime<Utc>,
    ) -> Result<Option<(Booking, BookingEffects)>, BookingError> {
        match booking.status {
            ReservationStatus::Reserved => {
                if booking.hold_lapsed(now)
                    && conflict::has_conflict(tx, booking.court_id, &booking.interval, Some(booking.id), now).await?
                {
                    tracing::warn!(
                        booking_id = %booking.id,
                        order_reference = %intent.order_reference,
                        "Payment arrived after the slot was taken, refund required"
                    );
                    return Ok(None);
                }
                let (paid, effects) = self.engine.transition(Some(booking), BookingAction::ConfirmPayment)?;
                let paid = paid.ok_or_else(|| BookingError::Internal("payment produced no booking".to_string()))?;
                tx.update_booking(&paid).await?;
                Ok(Some((paid, effects)))
            }
            status => {
                tracing::warn!(
                    booking_id = %booking.id,
                    %status,
                    order_reference = %intent.order_reference,
                    "Payment for a booking that is no longer payable, refund required"
                );
                Ok(None)
            }
        }
    }
}

/// Order reference for a new intent, skipping references this booking
/// already used within the same millisecond.
fn next_order_reference(booking_id: BookingId, now: DateTime<Utc>, previous: &[PaymentIntent]) -> String {
    let mut at = now;
    loop {
        let candidate = order_reference(booking_id, at);
        if previous.iter().all(|intent| intent.order_reference != candidate) {
            return candidate;
        }
        at += chrono::Duration::milliseconds(1);
    }
}

/// Line item shown on the provider's checkout page.
fn describe(court_name: &str, booking: &Booking) -> String {
    format!(
        "{court_name} {} - {} UTC",
        booking.interval.start().format("%Y-%m-%d %H:%M"),
        booking.interval.end().format("%H:%M")
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{BookingStatus, PaymentStatus};
    use chrono::{Duration, TimeZone};

    #[test]
    fn order_references_stay_unique_within_a_millisecond() {
        let booking_id = BookingId::new();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let first = next_order_reference(booking_id, now, &[]);
        let taken = PaymentIntent {
            id: PaymentIntentId::new(),
            booking_id,
            account_id: crate::types::PaymentAccountId::new(),
            provider: ProviderKind::Stripe,
            order_reference: first.clone(),
            amount: Money::from_cents(100),
            currency: Currency::parse("EUR").unwrap(),
            status: IntentStatus::Expired,
            checkout_url: None,
            provider_reference: None,
            created_at: now,
            updated_at: now,
        };
        let second = next_order_reference(booking_id, now, &[taken]);
        assert_ne!(first, second);
        assert_eq!(second, order_reference(booking_id, now + Duration::milliseconds(1)));
    }

    #[test]
    fn describes_the_slot() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 18, 30, 0).unwrap();
        let booking = Booking {
            id: BookingId::new(),
            court_id: CourtId::new(),
            club_id: ClubId::new(),
            user_id: UserId::new(),
            coach_id: None,
            interval: Interval::new(start, start + Duration::minutes(90)).unwrap(),
            price: Money::from_cents(100),
            currency: Currency::parse("EUR").unwrap(),
            sport_type: "padel".to_string(),
            status: ReservationStatus::Reserved,
            booking_status: BookingStatus::Upcoming,
            payment_status: PaymentStatus::Unpaid,
            reservation_expires_at: None,
            created_at: start,
            updated_at: start,
        };
        assert_eq!(describe("Court 3", &booking), "Court 3 2025-03-10 18:30 - 20:00 UTC");
    }
}
