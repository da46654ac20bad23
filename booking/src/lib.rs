//! Courtside - court reservations with payment orchestration.
//!
//! Players reserve a court slot, which holds it for a short window, then pay
//! through a hosted checkout. Provider callbacks settle the payment and turn
//! the hold into a paid booking.
//!
//! # Architecture
//!
//! ```text
//!              HTTP (axum)                        provider webhooks
//!                  │                                      │
//!                  ▼                                      ▼
//!        ┌──────────────────┐                 ┌──────────────────────┐
//!        │  BookingEngine   │◀────────────────│  PaymentOrchestrator │──▶ Stripe / WayForPay
//!        └──────────────────┘                 └──────────────────────┘
//!          │  lifecycle reducer (pure transitions + notification effects)
//!          ▼
//!        ┌──────────────────────────────────────────────┐
//!        │ BookingTx: conflict check, booking write,     │
//!        │ payment intents, daily statistics             │  one transaction
//!        └──────────────────────────────────────────────┘
//!          │ after commit
//!          ▼
//!        BookingNotifier ──▶ realtime WebSocket topics
//! ```
//!
//! # Double booking
//!
//! No in-process lock guards a slot. The conflict check and the booking
//! insert share one `SERIALIZABLE` transaction; when two requests race for
//! overlapping slots the database aborts one of them, the engine re-runs it,
//! and the re-run sees the winner and answers with a slot conflict.
//!
//! # Holds
//!
//! A reservation blocks its slot until `reservationExpiresAt`. After that it
//! stops blocking but is kept, so its owner can still pay for it as long as
//! nobody else took the slot meanwhile.
//!
//! # Webhooks
//!
//! Callbacks are verified against the secret of the account the intent was
//! created with before anything changes. A replayed callback finds the intent
//! already settled and is acknowledged without side effects.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod cleanup;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod notifier;
pub mod payments;
pub mod pricing;
pub mod server;
pub mod statistics;
pub mod store;
pub mod types;

pub use config::Config;
pub use engine::{BookingEngine, BookingView, CreateBooking, EngineSettings};
pub use error::BookingError;
pub use payments::{PaymentCheckout, PaymentOrchestrator, PaymentSettings};
pub use types::*;
