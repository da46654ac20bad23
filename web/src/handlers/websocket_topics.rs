//! Topic-based WebSocket streaming.
//!
//! Publishers push events to named topics (`club:<id>`, `court:<id>`, ...).
//! Each WebSocket connection follows a single topic chosen at upgrade time and
//! receives every event published to it afterwards.
//!
//! Delivery is best effort. Publishing to a topic nobody follows is a no-op,
//! and a client that falls behind the channel capacity loses the oldest events
//! (it is told how many via a `lagged` frame).
//!
//! # Message Protocol
//!
//! **Server → Client (Event):**
//! ```json
//! { "type": "event", "topic": "club:7f0c...", "event": { ... } }
//! ```
//!
//! **Server → Client (Lagged):**
//! ```json
//! { "type": "lagged", "skipped": 12 }
//! ```
//!
//! **Client → Server:** `{"type":"ping"}` is answered with `{"type":"pong"}`;
//! anything else is ignored.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Default per-topic channel capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

type ChannelsMap<E> = Arc<RwLock<HashMap<String, broadcast::Sender<(String, E)>>>>;

/// Frames sent to and accepted from clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopicEnvelope<E> {
    /// An event published to the followed topic
    Event {
        /// Topic the event was published on
        topic: String,
        /// Event payload
        event: E,
    },
    /// The client fell behind and missed events
    Lagged {
        /// Number of dropped events
        skipped: u64,
    },
    /// Client keep-alive
    Ping,
    /// Reply to [`TopicEnvelope::Ping`]
    Pong,
}

/// Fan-out of events to per-topic broadcast channels.
///
/// # Example
///
/// ```ignore
/// let broadcaster = TopicBroadcaster::<BookingEvent>::new(1000);
/// let mut rx = broadcaster.subscribe("club:42").await;
/// broadcaster.publish("club:42", event).await;
/// ```
pub struct TopicBroadcaster<E>
where
    E: Clone + Send + 'static,
{
    channels: ChannelsMap<E>,
    capacity: usize,
}

impl<E> TopicBroadcaster<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Create a broadcaster whose topic channels hold `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Publish an event to a topic.
    ///
    /// Returns the number of receivers that got it.
    pub async fn publish(&self, topic: impl Into<String>, event: E) -> usize {
        let topic = topic.into();
        let channels = self.channels.read().await;
        let Some(sender) = channels.get(&topic) else {
            return 0;
        };
        sender.send((topic, event)).unwrap_or(0)
    }

    /// Follow a topic.
    pub async fn subscribe(&self, topic: impl Into<String>) -> broadcast::Receiver<(String, E)> {
        let mut channels = self.channels.write().await;
        channels
            .entry(topic.into())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop channels with no remaining receivers.
    pub async fn prune(&self) {
        self.channels
            .write()
            .await
            .retain(|_, sender| sender.receiver_count() > 0);
    }

    /// Number of topics with a live channel.
    pub async fn topic_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl<E> Default for TopicBroadcaster<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<E> Clone for TopicBroadcaster<E>
where
    E: Clone + Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
            capacity: self.capacity,
        }
    }
}

/// Stream events from `rx` to an upgraded socket until either side closes.
///
/// # Example
///
/// ```ignore
/// async fn ws(ws: WebSocketUpgrade, State(b): State<TopicBroadcaster<Event>>) -> Response {
///     let rx = b.subscribe("club:42").await;
///     ws.on_upgrade(move |socket| serve_topic(socket, rx))
/// }
/// ```
pub async fn serve_topic<E>(socket: WebSocket, mut rx: broadcast::Receiver<(String, E)>)
where
    E: Serialize + for<'de> Deserialize<'de> + Clone + Send + 'static,
{
    info!("WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();

    loop {
        let outgoing = tokio::select! {
            published = rx.recv() => match published {
                Ok((topic, event)) => TopicEnvelope::Event { topic, event },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagging, events dropped");
                    TopicEnvelope::Lagged { skipped }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<TopicEnvelope<E>>(&text) {
                        Ok(TopicEnvelope::Ping) => TopicEnvelope::Pong,
                        _ => {
                            debug!("Ignoring client frame");
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };

        let Ok(json) = serde_json::to_string(&outgoing) else {
            continue;
        };
        if sender.send(Message::Text(json)).await.is_err() {
            break;
        }
    }

    info!("WebSocket connection closed");
}
