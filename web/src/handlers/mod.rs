//! HTTP request handlers shared by Courtside services.

pub mod health;
pub mod websocket_topics;

pub use health::{health_check, readiness, ReadinessProbe, ReadinessReport};
pub use websocket_topics::{serve_topic, TopicBroadcaster, TopicEnvelope};
