//! `GET /ws/bookings?clubId=…&courtId=…`
//!
//! Follows one court when `courtId` is given, otherwise the whole club.
//! Court feeds are open to any caller; club feeds are limited to the club's
//! staff.

use crate::notifier::{club_topic, court_topic};
use crate::server::state::AppState;
use crate::types::{ClubId, CourtId};
use axum::{
    extract::{rejection::QueryRejection, ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use courtside_web::handlers::websocket_topics::serve_topic;
use courtside_web::{Actor, AppError};
use serde::Deserialize;

/// Subscription filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionQuery {
    /// Club to follow
    pub club_id: Option<ClubId>,
    /// Court to follow
    pub court_id: Option<CourtId>,
}

/// Topic for a subscription, checking the caller may follow it.
fn topic_for(actor: &Actor, query: &SubscriptionQuery) -> Result<String, AppError> {
    match (query.court_id, query.club_id) {
        (Some(court_id), _) => Ok(court_topic(court_id)),
        (None, Some(club_id)) if actor.manages_club(*club_id.as_uuid()) => Ok(club_topic(club_id)),
        (None, Some(_)) => Err(AppError::forbidden("Club feed is limited to club staff")),
        (None, None) => Err(AppError::bad_request("clubId or courtId is required")),
    }
}

/// Upgrade to a WebSocket streaming booking events.
///
/// # Errors
///
/// `400` without a filter, `403` for a club feed of a foreign club.
pub async fn booking_updates(
    actor: Actor,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    query: Result<Query<SubscriptionQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query?;
    let topic = topic_for(&actor, &query)?;
    tracing::debug!(%topic, user_id = %actor.user_id, "Realtime subscription");
    let rx = state.notifier.topics().subscribe(topic).await;
    Ok(ws.on_upgrade(move |socket| serve_topic(socket, rx)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn court_filter_wins() {
        let court_id = CourtId::new();
        let query = SubscriptionQuery {
            club_id: Some(ClubId::new()),
            court_id: Some(court_id),
        };
        let topic = topic_for(&Actor::player(Uuid::new_v4()), &query).unwrap();
        assert_eq!(topic, court_topic(court_id));
    }

    #[test]
    fn club_feed_needs_staff() {
        let club_id = ClubId::new();
        let query = SubscriptionQuery {
            club_id: Some(club_id),
            court_id: None,
        };
        assert!(topic_for(&Actor::player(Uuid::new_v4()), &query).is_err());

        let staff = Actor::staff(Uuid::new_v4(), vec![*club_id.as_uuid()]);
        assert_eq!(topic_for(&staff, &query).unwrap(), club_topic(club_id));
    }

    #[test]
    fn filter_is_required() {
        let query = SubscriptionQuery {
            club_id: None,
            court_id: None,
        };
        let err = topic_for(&Actor::player(Uuid::new_v4()), &query).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
