//! Process-wide event hub (spec.md §4.8).
//!
//! Specified only at its interface with the core: the core publishes onto
//! named topics; an external transport (HTTP/WebSocket, out of scope)
//! subscribes. Grounded on the teacher's `services::event_bus::EventBus`
//! broadcast-channel shape, simplified to drop the persistence/sequence-
//! number machinery that belongs to the dashboard's event history view —
//! not part of this core.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of each topic's broadcast channel. Slow subscribers that fall
/// this far behind miss the oldest events (`RecvError::Lagged`) — delivery
/// is explicitly best-effort, at-most-once (spec.md §4.8).
const CHANNEL_CAPACITY: usize = 1024;

/// Topic a subscriber registers interest in. `All` mirrors the `"*"` scheme
/// from spec.md; `Chat` mirrors `"chat:<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    All,
    Chat(String),
    Custom(String),
}

impl Topic {
    pub fn key(&self) -> String {
        match self {
            Self::All => "*".to_string(),
            Self::Chat(id) => format!("chat:{id}"),
            Self::Custom(name) => name.clone(),
        }
    }
}

/// An event broadcast on the fan-out hub. Payload is the JSON of the
/// entity that changed, per spec.md's event-stream contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            emitted_at: Utc::now(),
        }
    }
}

/// Canonical event kinds named in spec.md §4.8.
pub mod kinds {
    pub const WORKER_SPAWNED: &str = "worker_spawned";
    pub const WORKER_DISMISSED: &str = "worker_dismissed";
    pub const WORKER_OUTPUT: &str = "worker_output";
    pub const TASK_ASSIGNED: &str = "task_assigned";
    pub const NEW_MESSAGE: &str = "new_message";
    pub const BROADCAST: &str = "broadcast";
    pub const WORKFLOW_STARTED: &str = "workflow:started";
    pub const WORKFLOW_COMPLETED: &str = "workflow:completed";
    pub const WORKFLOW_FAILED: &str = "workflow:failed";
    pub const STEP_FAILED: &str = "step:failed";
    pub const WORKER_EXIT: &str = "worker:exit";
}

/// Per-topic broadcast hub. Every topic gets its own channel created
/// lazily on first publish or subscribe; subscriber sets are protected by
/// a per-hub lock, and broadcasts take a snapshot (the `broadcast::Sender`
/// clone) before sending so unsubscribes mid-emission never race.
#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `event` on `topic`. A no-op if nobody has ever subscribed to
    /// that topic (no channel exists yet) — callers do not need to check
    /// for subscribers first.
    pub fn publish(&self, topic: &Topic, event: Event) {
        let key = topic.key();
        let sender = {
            let channels = self.channels.read().unwrap();
            channels.get(&key).cloned()
        };
        if let Some(sender) = sender {
            let _ = sender.send(event);
        }
    }

    /// Publish on both the specific topic and the `"*"` wildcard topic, so
    /// a subscriber interested in everything doesn't need one subscription
    /// per topic.
    pub fn publish_broadcast(&self, topic: &Topic, event: Event) {
        self.publish(topic, event.clone());
        if *topic != Topic::All {
            self.publish(&Topic::All, event);
        }
    }

    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Event> {
        let key = topic.key();
        {
            let channels = self.channels.read().unwrap();
            if let Some(sender) = channels.get(&key) {
                return sender.subscribe();
            }
        }
        let mut channels = self.channels.write().unwrap();
        let sender = channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let bus = EventBus::new();
        let topic = Topic::Chat("swarm-1".to_string());
        let mut rx = bus.subscribe(&topic);

        bus.publish(&topic, Event::new(kinds::WORKER_SPAWNED, serde_json::json!({"handle": "alice"})));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, kinds::WORKER_SPAWNED);
    }

    #[tokio::test]
    async fn wildcard_subscriber_receives_everything() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&Topic::All);

        bus.publish_broadcast(&Topic::Chat("swarm-1".to_string()), Event::new(kinds::NEW_MESSAGE, Value::Null));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, kinds::NEW_MESSAGE);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(&Topic::Custom("nobody-listening".to_string()), Event::new("x", Value::Null));
    }
}
