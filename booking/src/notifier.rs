//! Realtime booking notifications.
//!
//! Events are published only from effects the engine runs after a
//! transaction commits. Each event goes to the club topic and the court topic
//! so dashboards can follow either without a follow-up query. Delivery is
//! best effort: nobody listening is not an error.

use crate::types::{
    Booking, BookingId, BookingStatus, ClubId, CourtId, Money, PaymentStatus, ReservationStatus, UserId,
};
use chrono::{DateTime, Utc};
use courtside_web::handlers::TopicBroadcaster;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Kind of booking change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEventKind {
    /// A reservation was created
    BookingCreated,
    /// A booking changed status, hold or payment
    BookingUpdated,
    /// A stale reservation was purged
    BookingDeleted,
}

/// Denormalized booking change published to observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingEvent {
    /// What happened
    pub event: BookingEventKind,
    /// Booking
    pub booking_id: BookingId,
    /// Court
    pub court_id: CourtId,
    /// Club
    pub club_id: ClubId,
    /// Booking owner
    pub user_id: UserId,
    /// Combined status
    pub status: ReservationStatus,
    /// Session status
    pub booking_status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Slot start
    pub start_time: DateTime<Utc>,
    /// Slot end
    pub end_time: DateTime<Utc>,
    /// Price in minor units
    pub price: Money,
    /// Hold end, while reserved
    pub reservation_expires_at: Option<DateTime<Utc>>,
}

impl BookingEvent {
    /// Event describing `booking` as it is now.
    #[must_use]
    pub fn new(event: BookingEventKind, booking: &Booking) -> Self {
        Self {
            event,
            booking_id: booking.id,
            court_id: booking.court_id,
            club_id: booking.club_id,
            user_id: booking.user_id,
            status: booking.status,
            booking_status: booking.booking_status,
            payment_status: booking.payment_status,
            start_time: booking.interval.start(),
            end_time: booking.interval.end(),
            price: booking.price,
            reservation_expires_at: booking.reservation_expires_at,
        }
    }
}

/// Topic carrying every event of a club.
#[must_use]
pub fn club_topic(club_id: ClubId) -> String {
    format!("club:{club_id}")
}

/// Topic carrying every event of a court.
#[must_use]
pub fn court_topic(court_id: CourtId) -> String {
    format!("court:{court_id}")
}

/// Outbound channel for booking events.
pub trait BookingNotifier: Send + Sync {
    /// Deliver an event. Never fails.
    fn publish(&self, event: BookingEvent) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Notifier fanning events out over in-process broadcast topics, consumed by
/// the realtime WebSocket endpoint.
#[derive(Clone, Default)]
pub struct BroadcastNotifier {
    topics: TopicBroadcaster<BookingEvent>,
}

impl BroadcastNotifier {
    /// Notifier over an existing broadcaster.
    #[must_use]
    pub const fn new(topics: TopicBroadcaster<BookingEvent>) -> Self {
        Self { topics }
    }

    /// Underlying broadcaster, for subscribing.
    #[must_use]
    pub const fn topics(&self) -> &TopicBroadcaster<BookingEvent> {
        &self.topics
    }
}

impl BookingNotifier for BroadcastNotifier {
    fn publish(&self, event: BookingEvent) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let court = self.topics.publish(court_topic(event.court_id), event.clone()).await;
            let club = self.topics.publish(club_topic(event.club_id), event.clone()).await;
            tracing::debug!(
                booking_id = %event.booking_id,
                kind = ?event.event,
                receivers = court + club,
                "Booking event published"
            );
        })
    }
}
