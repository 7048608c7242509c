//! Per-owner result streams — the pub/sub collaborator seen by the task
//! framework. `is_listening` backs the backpressure gate: a polling chain
//! whose owner has no live subscriber stops re-enqueueing itself.

use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};

/// One message on an owner's stream.
#[derive(Debug, Clone)]
pub struct SessionMessage {
    /// Routing topic, normally the task key ("list_machines", "probe", ...)
    /// or "notifications" / "session_update".
    pub topic: String,
    pub payload: serde_json::Value,
}

/// In-process pub/sub fan-out, one broadcast channel per owner.
#[derive(Default)]
pub struct SessionBus {
    channels: Mutex<HashMap<String, broadcast::Sender<SessionMessage>>>,
}

impl SessionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an owner's stream. The channel is created lazily.
    pub async fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<SessionMessage> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    /// Whether any consumer is currently subscribed for this owner.
    pub async fn is_listening(&self, owner_id: &str) -> bool {
        let channels = self.channels.lock().await;
        channels
            .get(owner_id)
            .map(|tx| tx.receiver_count() > 0)
            .unwrap_or(false)
    }

    /// Publish to the owner's stream. Returns false when nobody received
    /// the message (no channel, or all receivers gone).
    pub async fn publish(&self, owner_id: &str, topic: &str, payload: serde_json::Value) -> bool {
        let channels = self.channels.lock().await;
        let Some(tx) = channels.get(owner_id) else {
            return false;
        };
        tx.send(SessionMessage {
            topic: topic.to_string(),
            payload,
        })
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listening_tracks_subscribers() {
        let bus = SessionBus::new();
        assert!(!bus.is_listening("org-1").await);

        let rx = bus.subscribe("org-1").await;
        assert!(bus.is_listening("org-1").await);
        assert!(!bus.is_listening("org-2").await);

        drop(rx);
        assert!(!bus.is_listening("org-1").await);
    }

    #[tokio::test]
    async fn test_publish_without_listener_reports_false() {
        let bus = SessionBus::new();
        assert!(!bus.publish("org-1", "list_machines", serde_json::json!({})).await);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = SessionBus::new();
        let mut rx = bus.subscribe("org-1").await;
        assert!(bus.publish("org-1", "probe", serde_json::json!({"ok": true})).await);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "probe");
        assert_eq!(msg.payload["ok"], true);
    }
}
