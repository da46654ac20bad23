//! Axum integration for Courtside services.
//!
//! The booking engine keeps its decisions in pure reducers and store
//! transactions; this crate is the imperative shell around them:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, JSON, WebSockets
//! │  - Actor resolution, correlation ids    │
//! │  - AppError → status + JSON body        │
//! ├─────────────────────────────────────────┤
//! │         Functional Core                 │
//! │  - Reducers and transactional stores    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use courtside_web::{Actor, AppError};
//!
//! async fn get_booking(actor: Actor, Path(id): Path<Uuid>) -> Result<Json<View>, AppError> {
//!     let view = engine.get_status(&actor, id).await?;
//!     Ok(Json(view))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::{AppError, ErrorBody};
pub use extractors::{Actor, ActorResolver, CorrelationId, HeaderActorResolver, Role};
pub use middleware::{correlation_id, CORRELATION_ID_HEADER};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
