//! C10 Event Bus half: a broadcast channel of tagged envelopes, fanned out to
//! every subscriber in publication order. The transport half
//! (WebSocket upgrade, command dispatch) lives in the `gateway` crate; this
//! module only owns the channel and envelope shape, mirroring
//! `tandem-core::EventBus`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    System,
    Deploy,
    Task,
    Timer,
    Notification,
    Logs,
    Response,
    Error,
}

/// A push event or command response published to every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub event: String,
    pub data: serde_json::Value,
    pub timestamp: f64,
}

impl Envelope {
    pub fn new(kind: EnvelopeType, event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            event: event.into(),
            data,
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn response(command: &str, data: serde_json::Value) -> Self {
        Self::new(EnvelopeType::Response, command.to_string(), data)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            EnvelopeType::Error,
            "error",
            serde_json::json!({ "message": message.into() }),
        )
    }
}

/// Thin wrapper over `broadcast::Sender<Envelope>`. Cloning is cheap; every
/// clone shares the same channel, matching `tandem-core::EventBus`'s
/// `Arc`-free clone-a-sender pattern.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Publishing to a bus with no subscribers is not an error: events are
    /// push-only, nobody is obligated to be listening.
    pub fn publish(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }

    pub fn publish_event(&self, kind: EnvelopeType, event: &str, data: serde_json::Value) {
        self.publish(Envelope::new(kind, event, data));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_publication_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish_event(EnvelopeType::Deploy, "deploy.started", serde_json::json!({"n": 1}));
        bus.publish_event(EnvelopeType::Deploy, "deploy.completed", serde_json::json!({"n": 2}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.event, "deploy.started");
        assert_eq!(second.event, "deploy.completed");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish_event(EnvelopeType::System, "system.ping", serde_json::json!({}));
    }
}
