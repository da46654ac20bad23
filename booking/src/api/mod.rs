//! HTTP API of the booking service.
//!
//! - `POST /api/bookings`: reserve a slot
//! - `GET /api/bookings/:id`: poll booking and payment status
//! - `POST /api/bookings/:id/cancel`: cancel a booking
//! - `GET /api/courts/:id/quote`: price a slot
//! - `POST /api/payments`: start a checkout for a booking or a slot
//! - `POST /webhooks/:provider`: provider callbacks
//! - `GET /ws/bookings`: realtime booking events

pub mod bookings;
pub mod payments;
pub mod prices;
pub mod realtime;
pub mod webhooks;

pub use bookings::{cancel_booking, create_booking, get_booking};
pub use payments::initiate_payment;
pub use prices::quote_price;
pub use realtime::booking_updates;
pub use webhooks::provider_webhook;
