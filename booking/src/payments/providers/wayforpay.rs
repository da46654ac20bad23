//! `WayForPay` invoices.
//!
//! Checkouts are `CREATE_INVOICE` API calls signed with HMAC-MD5 of the
//! `;`-joined request fields under the merchant secret. Service callbacks are
//! signed the same way and must be answered with a signed `accept`, otherwise
//! `WayForPay` keeps re-delivering them.

use super::{
    sign_hex, verify_any_hex, CallbackOutcome, CheckoutRequest, CheckoutSession, HmacMd5, PaymentProvider,
    ProviderCallback, ProviderError, ProviderFuture, WebhookAck,
};
use crate::types::{PaymentAccount, ProviderKind};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.wayforpay.com/api";

/// Reason code of a successful API call.
const REASON_OK: i64 = 1100;

/// Fields of a service callback covered by its signature, in order.
const CALLBACK_SIGNED_FIELDS: [&str; 8] = [
    "merchantAccount",
    "orderReference",
    "amount",
    "currency",
    "authCode",
    "cardPan",
    "transactionStatus",
    "reasonCode",
];

/// `WayForPay` adapter.
#[derive(Clone, Debug)]
pub struct WayforpayProvider {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceResponse {
    reason: Option<String>,
    reason_code: Option<i64>,
    invoice_url: Option<String>,
}

impl WayforpayProvider {
    /// Adapter talking to `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Signature over the callback fields of a raw `body`, as `WayForPay` computes it.
    ///
    /// # Errors
    ///
    /// [`ProviderError::MalformedCallback`] when `body` is not a JSON object.
    pub fn callback_signature(secret: &str, body: &[u8]) -> Result<String, ProviderError> {
        let fields = CallbackFields::parse(body)?;
        Ok(sign_hex::<HmacMd5>(secret, &fields.signed_message()))
    }

    fn invoice(account: &PaymentAccount, request: &CheckoutRequest) -> Value {
        let amount = request.amount.to_major_string(&request.currency);
        let order_date = request.created_at.timestamp();
        let order_date_text = order_date.to_string();
        let message = [
            account.merchant_id.as_str(),
            request.merchant_domain.as_str(),
            request.order_reference.as_str(),
            order_date_text.as_str(),
            amount.as_str(),
            request.currency.as_str(),
            request.description.as_str(),
            "1",
            amount.as_str(),
        ]
        .join(";");

        json!({
            "transactionType": "CREATE_INVOICE",
            "apiVersion": 1,
            "merchantAccount": account.merchant_id,
            "merchantAuthType": "SimpleSignature",
            "merchantDomainName": request.merchant_domain,
            "merchantSignature": sign_hex::<HmacMd5>(account.secret_key.expose(), &message),
            "orderReference": request.order_reference,
            "orderDate": order_date,
            "amount": amount,
            "currency": request.currency.as_str(),
            "productName": [request.description],
            "productPrice": [amount],
            "productCount": [1],
            "serviceUrl": request.callback_url,
            "returnUrl": request.return_url,
        })
    }

    fn outcome(status: &str, reason: &str) -> CallbackOutcome {
        match status {
            "Approved" => CallbackOutcome::Succeeded,
            "Declined" | "Expired" | "Refused" => CallbackOutcome::Failed {
                reason: format!("{status}: {reason}"),
            },
            other => CallbackOutcome::Ignored {
                status: other.to_string(),
            },
        }
    }
}

impl Default for WayforpayProvider {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_BASE_URL)
    }
}

/// Top-level callback fields, kept as the provider wrote them.
struct CallbackFields(HashMap<String, Box<RawValue>>);

impl CallbackFields {
    fn parse(body: &[u8]) -> Result<Self, ProviderError> {
        serde_json::from_slice(body)
            .map(Self)
            .map_err(|e| ProviderError::MalformedCallback(e.to_string()))
    }

    /// Field rendered the way it appears in the signed string: strings
    /// unquoted, numbers verbatim, missing or null fields empty.
    fn text(&self, name: &str) -> String {
        let Some(raw) = self.0.get(name).map(|raw| raw.get()) else {
            return String::new();
        };
        if raw == "null" {
            String::new()
        } else if raw.starts_with('"') {
            serde_json::from_str(raw).unwrap_or_default()
        } else {
            raw.to_string()
        }
    }

    fn signed_message(&self) -> String {
        CALLBACK_SIGNED_FIELDS
            .iter()
            .map(|name| self.text(name))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl PaymentProvider for WayforpayProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Wayforpay
    }

    fn create_checkout<'a>(
        &'a self,
        account: &'a PaymentAccount,
        request: &'a CheckoutRequest,
    ) -> ProviderFuture<'a, CheckoutSession> {
        Box::pin(async move {
            let response = self
                .http
                .post(&self.base_url)
                .json(&Self::invoice(account, request))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(
                    status = status.as_u16(),
                    order_reference = %request.order_reference,
                    "WayForPay invoice failed"
                );
                return Err(ProviderError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            let invoice: InvoiceResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
            if invoice.reason_code != Some(REASON_OK) {
                let reason = invoice.reason.unwrap_or_else(|| "unknown reason".to_string());
                tracing::warn!(reason_code = ?invoice.reason_code, %reason, "WayForPay refused invoice");
                return Err(ProviderError::Rejected(reason));
            }
            let checkout_url = invoice
                .invoice_url
                .ok_or_else(|| ProviderError::MalformedResponse("invoice without invoiceUrl".to_string()))?;

            Ok(CheckoutSession {
                checkout_url,
                provider_reference: None,
            })
        })
    }

    fn parse_callback(&self, _headers: &HeaderMap, body: &[u8]) -> Result<ProviderCallback, ProviderError> {
        let fields = CallbackFields::parse(body)?;

        let order_reference = fields.text("orderReference");
        if order_reference.is_empty() {
            return Err(ProviderError::MalformedCallback("missing orderReference".to_string()));
        }
        let signature = fields.text("merchantSignature");
        if signature.is_empty() {
            return Err(ProviderError::MalformedCallback("missing merchantSignature".to_string()));
        }

        Ok(ProviderCallback {
            outcome: Self::outcome(&fields.text("transactionStatus"), &fields.text("reason")),
            order_reference,
            merchant_id: Some(fields.text("merchantAccount")),
            signed_payload: fields.signed_message(),
            signatures: vec![signature],
        })
    }

    fn verify_callback(&self, account: &PaymentAccount, callback: &ProviderCallback) -> Result<(), ProviderError> {
        if callback.merchant_id.as_deref() != Some(account.merchant_id.as_str()) {
            return Err(ProviderError::InvalidSignature);
        }
        verify_any_hex::<HmacMd5>(
            account.callback_secret().expose(),
            &callback.signed_payload,
            &callback.signatures,
        )
    }

    fn acknowledge(&self, account: &PaymentAccount, callback: &ProviderCallback, now: DateTime<Utc>) -> WebhookAck {
        let time = now.timestamp();
        let message = format!("{};accept;{time}", callback.order_reference);
        WebhookAck {
            status: StatusCode::OK,
            body: json!({
                "orderReference": callback.order_reference,
                "status": "accept",
                "time": time,
                "signature": sign_hex::<HmacMd5>(account.secret_key.expose(), &message),
            }),
        }
    }
}
