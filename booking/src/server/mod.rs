//! HTTP server for the booking service.
//!
//! - Application state shared by handlers
//! - Health and readiness endpoints
//! - Router configuration

pub mod health;
pub mod routes;
pub mod state;

pub use health::{readiness_check, StoreProbe};
pub use routes::build_router;
pub use state::AppState;
