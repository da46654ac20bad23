//! Scripted provider for tests and local development.
//!
//! Checkout calls follow a queue of scripted responses and fall back to a
//! successful session once the queue is empty. Callbacks are JSON objects
//! `{orderReference, status, signature}` signed with HMAC-SHA256 of
//! `"{orderReference};{status}"` under the account's callback secret.

use super::{
    sign_hex, verify_any_hex, CallbackOutcome, CheckoutRequest, CheckoutSession, HmacSha256, PaymentProvider,
    ProviderCallback, ProviderError, ProviderFuture, WebhookAck,
};
use crate::types::{PaymentAccount, ProviderKind};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Next answer of [`ScriptedProvider::create_checkout`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedResponse {
    /// Open a session at `https://pay.test/<order reference>`
    Checkout,
    /// Fail with a transport timeout
    Timeout,
    /// Fail with an HTTP status
    Http(u16),
    /// Provider refuses the request
    Rejected(String),
    /// Never answer
    Hang,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptedCallback {
    order_reference: String,
    status: String,
    signature: String,
}

/// Provider double answering from a script.
#[derive(Clone, Debug)]
pub struct ScriptedProvider {
    kind: ProviderKind,
    script: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    requests: Arc<Mutex<Vec<CheckoutRequest>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    /// Provider registered as `kind`.
    #[must_use]
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            script: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue the answer of the next checkout call.
    pub fn push(&self, response: ScriptedResponse) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(response);
    }

    /// Number of checkout calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Callback body for `order_reference` reporting `status`
    /// (`succeeded`, `failed` or anything else to be ignored).
    #[must_use]
    pub fn callback_body(secret: &str, order_reference: &str, status: &str) -> Vec<u8> {
        let signature = sign_hex::<HmacSha256>(secret, &format!("{order_reference};{status}"));
        serde_json::json!({
            "orderReference": order_reference,
            "status": status,
            "signature": signature,
        })
        .to_string()
        .into_bytes()
    }

    fn next(&self) -> ScriptedResponse {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(ScriptedResponse::Checkout)
    }
}

impl PaymentProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn create_checkout<'a>(
        &'a self,
        _account: &'a PaymentAccount,
        request: &'a CheckoutRequest,
    ) -> ProviderFuture<'a, CheckoutSession> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());

            match self.next() {
                ScriptedResponse::Checkout => Ok(CheckoutSession {
                    checkout_url: format!("https://pay.test/{}", request.order_reference),
                    provider_reference: Some(format!("scripted_{}", request.order_reference)),
                }),
                ScriptedResponse::Timeout => Err(ProviderError::Timeout),
                ScriptedResponse::Http(status) => Err(ProviderError::Http {
                    status,
                    body: String::new(),
                }),
                ScriptedResponse::Rejected(reason) => Err(ProviderError::Rejected(reason)),
                ScriptedResponse::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::Timeout)
                }
            }
        })
    }

    fn parse_callback(&self, _headers: &HeaderMap, body: &[u8]) -> Result<ProviderCallback, ProviderError> {
        let callback: ScriptedCallback =
            serde_json::from_slice(body).map_err(|e| ProviderError::MalformedCallback(e.to_string()))?;
        let outcome = match callback.status.as_str() {
            "succeeded" => CallbackOutcome::Succeeded,
            "failed" => CallbackOutcome::Failed {
                reason: "scripted failure".to_string(),
            },
            other => CallbackOutcome::Ignored {
                status: other.to_string(),
            },
        };
        Ok(ProviderCallback {
            signed_payload: format!("{};{}", callback.order_reference, callback.status),
            order_reference: callback.order_reference,
            outcome,
            merchant_id: None,
            signatures: vec![callback.signature],
        })
    }

    fn verify_callback(&self, account: &PaymentAccount, callback: &ProviderCallback) -> Result<(), ProviderError> {
        verify_any_hex::<HmacSha256>(
            account.callback_secret().expose(),
            &callback.signed_payload,
            &callback.signatures,
        )
    }

    fn acknowledge(&self, _account: &PaymentAccount, callback: &ProviderCallback, _now: DateTime<Utc>) -> WebhookAck {
        WebhookAck {
            status: StatusCode::OK,
            body: serde_json::json!({ "orderReference": callback.order_reference, "status": "accept" }),
        }
    }
}
