//! Stripe Checkout.
//!
//! Checkout sessions are created with a form-encoded `POST /v1/checkout/sessions`
//! authenticated with the account's secret key. Webhooks carry a
//! `Stripe-Signature: t=<unix>,v1=<hex>` header, an HMAC-SHA256 of
//! `"{t}.{body}"` under the account's webhook secret.

use super::{
    sign_hex, verify_any_hex, CallbackOutcome, CheckoutRequest, CheckoutSession, HmacSha256, PaymentProvider,
    ProviderCallback, ProviderError, ProviderFuture, WebhookAck,
};
use crate::types::{PaymentAccount, ProviderKind};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe adapter.
#[derive(Clone, Debug)]
pub struct StripeProvider {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: SessionObject,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    client_reference_id: Option<String>,
    payment_status: Option<String>,
}

impl StripeProvider {
    /// Adapter talking to `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Signature header value for `body`, as Stripe would send it.
    #[must_use]
    pub fn signature_header(secret: &str, timestamp: i64, body: &str) -> String {
        let signature = sign_hex::<HmacSha256>(secret, &format!("{timestamp}.{body}"));
        format!("t={timestamp},v1={signature}")
    }

    fn form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
        vec![
            ("mode", "payment".to_string()),
            ("client_reference_id", request.order_reference.clone()),
            ("success_url", request.return_url.clone()),
            ("cancel_url", request.return_url.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", request.currency.as_str().to_lowercase()),
            ("line_items[0][price_data][unit_amount]", request.amount.cents().to_string()),
            ("line_items[0][price_data][product_data][name]", request.description.clone()),
            ("metadata[order_reference]", request.order_reference.clone()),
            ("metadata[booking_id]", request.booking_id.to_string()),
        ]
    }

    fn outcome(event: &WebhookEvent) -> CallbackOutcome {
        let payment_status = event.data.object.payment_status.as_deref();
        match (event.kind.as_str(), payment_status) {
            ("checkout.session.completed", Some("paid" | "no_payment_required"))
            | ("checkout.session.async_payment_succeeded", _) => CallbackOutcome::Succeeded,
            ("checkout.session.expired" | "checkout.session.async_payment_failed", _) => CallbackOutcome::Failed {
                reason: event.kind.clone(),
            },
            (kind, status) => CallbackOutcome::Ignored {
                status: format!("{kind}:{}", status.unwrap_or("-")),
            },
        }
    }
}

impl Default for StripeProvider {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_BASE_URL)
    }
}

impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn create_checkout<'a>(
        &'a self,
        account: &'a PaymentAccount,
        request: &'a CheckoutRequest,
    ) -> ProviderFuture<'a, CheckoutSession> {
        Box::pin(async move {
            let response = self
                .http
                .post(format!("{}/v1/checkout/sessions", self.base_url))
                .bearer_auth(account.secret_key.expose())
                .header("Idempotency-Key", &request.order_reference)
                .form(&Self::form(request))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(
                    status = status.as_u16(),
                    order_reference = %request.order_reference,
                    "Stripe checkout failed"
                );
                return Err(ProviderError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            let session: SessionResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
            let checkout_url = session
                .url
                .ok_or_else(|| ProviderError::MalformedResponse("session without url".to_string()))?;

            Ok(CheckoutSession {
                checkout_url,
                provider_reference: Some(session.id),
            })
        })
    }

    fn parse_callback(&self, headers: &HeaderMap, body: &[u8]) -> Result<ProviderCallback, ProviderError> {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ProviderError::MalformedCallback("missing Stripe-Signature header".to_string()))?;

        // Stripe sends one v1 entry per active endpoint secret while rolling secrets.
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value.to_string()),
                Some(("v1", value)) => signatures.push(value.to_string()),
                _ => {}
            }
        }
        let Some(timestamp) = timestamp.filter(|_| !signatures.is_empty()) else {
            return Err(ProviderError::MalformedCallback("incomplete Stripe-Signature header".to_string()));
        };

        let text = std::str::from_utf8(body).map_err(|e| ProviderError::MalformedCallback(e.to_string()))?;
        let event: WebhookEvent =
            serde_json::from_str(text).map_err(|e| ProviderError::MalformedCallback(e.to_string()))?;
        let order_reference = event
            .data
            .object
            .client_reference_id
            .clone()
            .ok_or_else(|| ProviderError::MalformedCallback("event without client_reference_id".to_string()))?;

        Ok(ProviderCallback {
            order_reference,
            outcome: Self::outcome(&event),
            merchant_id: None,
            signed_payload: format!("{timestamp}.{text}"),
            signatures,
        })
    }

    fn verify_callback(&self, account: &PaymentAccount, callback: &ProviderCallback) -> Result<(), ProviderError> {
        verify_any_hex::<HmacSha256>(
            account.callback_secret().expose(),
            &callback.signed_payload,
            &callback.signatures,
        )
    }

    fn acknowledge(&self, _account: &PaymentAccount, _callback: &ProviderCallback, _now: DateTime<Utc>) -> WebhookAck {
        WebhookAck {
            status: StatusCode::OK,
            body: serde_json::json!({ "received": true }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{AccountOwner, ClubId, PaymentAccountId, Secret};
    use axum::http::HeaderValue;

    fn account() -> PaymentAccount {
        PaymentAccount {
            id: PaymentAccountId::new(),
            provider: ProviderKind::Stripe,
            owner: AccountOwner::Club(ClubId::new()),
            merchant_id: "acct_1".to_string(),
            secret_key: Secret::new("sk_test"),
            webhook_secret: Some(Secret::new("whsec_test")),
            verified: true,
            active: true,
            created_at: Utc::now(),
        }
    }

    fn event(kind: &str, payment_status: &str) -> String {
        serde_json::json!({
            "type": kind,
            "data": { "object": {
                "id": "cs_1",
                "client_reference_id": "ref-1",
                "payment_status": payment_status,
            }}
        })
        .to_string()
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn signed_completion_verifies() {
        let provider = StripeProvider::default();
        let body = event("checkout.session.completed", "paid");
        let header = StripeProvider::signature_header("whsec_test", 1_700_000_000, &body);

        let callback = provider.parse_callback(&headers(&header), body.as_bytes()).unwrap();
        assert_eq!(callback.order_reference, "ref-1");
        assert_eq!(callback.outcome, CallbackOutcome::Succeeded);
        provider.verify_callback(&account(), &callback).unwrap();
    }

    #[test]
    fn tampered_body_fails_verification() {
        let provider = StripeProvider::default();
        let body = event("checkout.session.completed", "paid");
        let header = StripeProvider::signature_header("whsec_test", 1_700_000_000, &body);
        let tampered = body.replace("ref-1", "ref-2");

        let callback = provider.parse_callback(&headers(&header), tampered.as_bytes()).unwrap();
        assert!(matches!(
            provider.verify_callback(&account(), &callback),
            Err(ProviderError::InvalidSignature)
        ));
    }

    #[test]
    fn any_v1_entry_may_carry_the_valid_signature() {
        let provider = StripeProvider::default();
        let body = event("checkout.session.completed", "paid");
        let retired = sign_hex::<HmacSha256>("whsec_old", &format!("1700000000.{body}"));
        let current = sign_hex::<HmacSha256>("whsec_test", &format!("1700000000.{body}"));
        let header = format!("t=1700000000,v1={retired},v1={current}");

        let callback = provider.parse_callback(&headers(&header), body.as_bytes()).unwrap();
        assert_eq!(callback.signatures.len(), 2);
        provider.verify_callback(&account(), &callback).unwrap();

        let only_retired = format!("t=1700000000,v1={retired},v0=deadbeef");
        let callback = provider.parse_callback(&headers(&only_retired), body.as_bytes()).unwrap();
        assert!(matches!(
            provider.verify_callback(&account(), &callback),
            Err(ProviderError::InvalidSignature)
        ));
    }

    #[test]
    fn api_key_does_not_sign_webhooks_when_a_webhook_secret_exists() {
        let provider = StripeProvider::default();
        let body = event("checkout.session.completed", "paid");
        let header = StripeProvider::signature_header("sk_test", 1_700_000_000, &body);
        let callback = provider.parse_callback(&headers(&header), body.as_bytes()).unwrap();
        assert!(provider.verify_callback(&account(), &callback).is_err());
    }

    #[test]
    fn maps_event_types() {
        let provider = StripeProvider::default();
        let outcome = |kind: &str, status: &str| {
            let body = event(kind, status);
            let header = StripeProvider::signature_header("x", 1, &body);
            provider.parse_callback(&headers(&header), body.as_bytes()).unwrap().outcome
        };
        assert!(matches!(outcome("checkout.session.expired", "unpaid"), CallbackOutcome::Failed { .. }));
        assert!(matches!(outcome("checkout.session.completed", "unpaid"), CallbackOutcome::Ignored { .. }));
        assert_eq!(outcome("checkout.session.async_payment_succeeded", "paid"), CallbackOutcome::Succeeded);
    }

    #[test]
    fn missing_header_is_malformed() {
        let provider = StripeProvider::default();
        let body = event("checkout.session.completed", "paid");
        assert!(matches!(
            provider.parse_callback(&HeaderMap::new(), body.as_bytes()),
            Err(ProviderError::MalformedCallback(_))
        ));
    }
}
