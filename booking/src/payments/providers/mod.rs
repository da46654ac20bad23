//! Payment provider adapters.
//!
//! A provider knows how to open a hosted checkout for an intent, how to read
//! its webhook payloads, how to check their signature against the merchant
//! account, and what to answer so it stops re-delivering. Provider calls never
//! touch the store; the orchestrator owns all state changes.

pub mod scripted;
pub mod stripe;
pub mod wayforpay;

pub use scripted::{ScriptedProvider, ScriptedResponse};
pub use stripe::StripeProvider;
pub use wayforpay::WayforpayProvider;

use crate::types::{BookingId, Currency, Money, PaymentAccount, ProviderKind};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Provider failures.
///
/// Call failures leave the intent `pending`; only a callback reporting a
/// failure marks it `failed`.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The call did not complete in time
    #[error("payment provider timed out")]
    Timeout,

    /// The provider answered with a non-success status
    #[error("payment provider returned HTTP {status}")]
    Http {
        /// Response status
        status: u16,
        /// Response body, for the logs
        body: String,
    },

    /// The request never reached the provider
    #[error("payment provider transport error: {0}")]
    Transport(String),

    /// The provider answered with something unreadable
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// The provider refused to create the checkout
    #[error("payment provider rejected the request: {0}")]
    Rejected(String),

    /// Webhook signature did not match the merchant secret
    #[error("invalid callback signature")]
    InvalidSignature,

    /// Webhook payload could not be read
    #[error("malformed callback: {0}")]
    MalformedCallback(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// What the provider needs to open a checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Booking being paid
    pub booking_id: BookingId,
    /// Unique reference of the intent
    pub order_reference: String,
    /// Amount in minor units
    pub amount: Money,
    /// Currency
    pub currency: Currency,
    /// Line item shown to the payer
    pub description: String,
    /// Where the provider sends webhooks
    pub callback_url: String,
    /// Where the payer lands afterwards
    pub return_url: String,
    /// Shop domain registered with the provider
    pub merchant_domain: String,
    /// Intent creation time
    pub created_at: DateTime<Utc>,
}

/// A hosted checkout opened by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutSession {
    /// Page the payer is sent to
    pub checkout_url: String,
    /// Provider-side id
    pub provider_reference: Option<String>,
}

/// Outcome reported by a callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Money collected
    Succeeded,
    /// Payment definitively failed
    Failed {
        /// Provider's reason
        reason: String,
    },
    /// Intermediate status that changes nothing
    Ignored {
        /// Provider's status
        status: String,
    },
}

/// A parsed, not yet verified, webhook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderCallback {
    /// Order reference of the intent
    pub order_reference: String,
    /// Reported outcome
    pub outcome: CallbackOutcome,
    /// Merchant the payload claims to be for, when the provider sends one
    pub merchant_id: Option<String>,
    /// Exact bytes the signature covers
    pub signed_payload: String,
    /// Signatures as sent, hex encoded; one valid signature is enough
    pub signatures: Vec<String>,
}

/// Response returned to the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookAck {
    /// HTTP status
    pub status: StatusCode,
    /// JSON body
    pub body: serde_json::Value,
}

/// A payment provider adapter.
pub trait PaymentProvider: Send + Sync {
    /// Provider this adapter talks to.
    fn kind(&self) -> ProviderKind;

    /// Open a hosted checkout.
    ///
    /// # Errors
    ///
    /// Transport, HTTP and response errors, or [`ProviderError::Rejected`].
    fn create_checkout<'a>(
        &'a self,
        account: &'a PaymentAccount,
        request: &'a CheckoutRequest,
    ) -> ProviderFuture<'a, CheckoutSession>;

    /// Read a webhook payload.
    ///
    /// # Errors
    ///
    /// [`ProviderError::MalformedCallback`] for unreadable payloads.
    fn parse_callback(&self, headers: &HeaderMap, body: &[u8]) -> Result<ProviderCallback, ProviderError>;

    /// Check a callback against the account it claims to be for.
    ///
    /// # Errors
    ///
    /// [`ProviderError::InvalidSignature`] on any mismatch.
    fn verify_callback(&self, account: &PaymentAccount, callback: &ProviderCallback) -> Result<(), ProviderError>;

    /// Answer telling the provider the callback was handled.
    fn acknowledge(&self, account: &PaymentAccount, callback: &ProviderCallback, now: DateTime<Utc>) -> WebhookAck;
}

/// Providers available to the orchestrator.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a provider.
    #[must_use]
    pub fn with(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Provider for `kind`.
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&kind).cloned()
    }
}

/// Hex HMAC of `message` under `secret`.
pub(crate) fn sign_hex<M>(secret: &str, message: &str) -> String
where
    M: Mac + KeyInit,
{
    // HMAC accepts keys of any length.
    match <M as KeyInit>::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(message.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Constant-time check of a hex HMAC.
fn verify_hex<M>(secret: &str, message: &str, signature: &str) -> Result<(), ProviderError>
where
    M: Mac + KeyInit,
{
    let expected = hex::decode(signature.trim()).map_err(|_| ProviderError::InvalidSignature)?;
    let mut mac = <M as KeyInit>::new_from_slice(secret.as_bytes())
        .map_err(|_| ProviderError::InvalidSignature)?;
    mac.update(message.as_bytes());
    mac.verify_slice(&expected).map_err(|_| ProviderError::InvalidSignature)
}

/// Accept `message` when any of `signatures` is a valid hex HMAC of it.
pub(crate) fn verify_any_hex<M>(secret: &str, message: &str, signatures: &[String]) -> Result<(), ProviderError>
where
    M: Mac + KeyInit,
{
    signatures
        .iter()
        .any(|signature| verify_hex::<M>(secret, message, signature).is_ok())
        .then_some(())
        .ok_or(ProviderError::InvalidSignature)
}

/// HMAC-SHA256.
pub(crate) type HmacSha256 = Hmac<sha2::Sha256>;

/// HMAC-MD5.
pub(crate) type HmacMd5 = Hmac<md5::Md5>;
