//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation id (see [`crate::middleware`])
//! - `Actor`: the verified caller and their role
//!
//! Authentication itself happens upstream. This crate only consumes its
//! result through the [`ActorResolver`] capability, which the application
//! exposes from its router state via `FromRef`.
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(actor: Actor, correlation_id: CorrelationId) -> Result<Json<Body>, AppError> {
//!     tracing::info!(user_id = %actor.user_id, correlation_id = %correlation_id.0, "Handling");
//!     Ok(Json(body))
//! }
//! ```

use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Header carrying the authenticated user id (set by the auth gateway).
pub const ACTOR_ID_HEADER: &str = "X-Actor-Id";
/// Header carrying the authenticated user's role.
pub const ACTOR_ROLE_HEADER: &str = "X-Actor-Role";
/// Header carrying the comma-separated club ids a staff member manages.
pub const ACTOR_CLUBS_HEADER: &str = "X-Actor-Clubs";

/// Correlation ID for request tracing.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }
        Ok(Self(
            crate::middleware::from_headers(&parts.headers).unwrap_or_else(Uuid::new_v4),
        ))
    }
}

/// Role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End user booking courts for themselves
    Player,
    /// Operator of one or more clubs
    ClubStaff,
    /// Platform administrator
    Admin,
}

impl Role {
    /// Parse the wire representation used by the auth gateway.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "player" | "user" => Some(Self::Player),
            "club_staff" | "staff" => Some(Self::ClubStaff),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Authenticated user id
    pub user_id: Uuid,
    /// Caller role
    pub role: Role,
    /// Clubs a `ClubStaff` caller manages
    pub club_ids: Vec<Uuid>,
}

impl Actor {
    /// A player acting for themselves.
    #[must_use]
    pub const fn player(user_id: Uuid) -> Self {
        Self { user_id, role: Role::Player, club_ids: Vec::new() }
    }

    /// Staff managing the given clubs.
    #[must_use]
    pub const fn staff(user_id: Uuid, club_ids: Vec<Uuid>) -> Self {
        Self { user_id, role: Role::ClubStaff, club_ids }
    }

    /// Platform administrator.
    #[must_use]
    pub const fn admin(user_id: Uuid) -> Self {
        Self { user_id, role: Role::Admin, club_ids: Vec::new() }
    }

    /// Whether this caller may operate on behalf of `club_id`.
    #[must_use]
    pub fn manages_club(&self, club_id: Uuid) -> bool {
        match self.role {
            Role::Admin => true,
            Role::ClubStaff => self.club_ids.contains(&club_id),
            Role::Player => false,
        }
    }
}

/// Capability that turns request headers into a verified [`Actor`].
pub trait ActorResolver: Send + Sync {
    /// Resolve the current actor.
    ///
    /// # Errors
    ///
    /// Returns `401 Unauthorized` when the request carries no usable identity.
    fn resolve(&self, headers: &HeaderMap) -> Result<Actor, AppError>;
}

/// Resolver trusting identity headers injected by an upstream auth gateway.
///
/// Only deploy this behind a proxy that strips these headers from client
/// traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderActorResolver;

impl ActorResolver for HeaderActorResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<Actor, AppError> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let user_id = header(ACTOR_ID_HEADER)
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or_else(|| AppError::unauthorized("Missing or invalid actor identity"))?;

        let role = match header(ACTOR_ROLE_HEADER) {
            Some(raw) => Role::parse(raw)
                .ok_or_else(|| AppError::unauthorized(format!("Unknown role: {raw}")))?,
            None => Role::Player,
        };

        let club_ids = header(ACTOR_CLUBS_HEADER)
            .map(|raw| {
                raw.split(',')
                    .filter_map(|part| Uuid::parse_str(part.trim()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Actor { user_id, role, club_ids })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
    Arc<dyn ActorResolver>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = Arc::<dyn ActorResolver>::from_ref(state);
        resolver.resolve(&parts.headers)
    }
}
