//! The event bus (C7): topic-keyed, at-least-once, best-effort fan-out to
//! live subscribers. This is the in-process fabric between the intent
//! handler and pipeline workers (outside this crate's scope); no
//! durability guarantees.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartEvent {
    pub session_id: String,
    pub service_ref: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub requested_at_unix: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStopEvent {
    pub session_id: String,
    pub requested_at_unix: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BusEvent {
    #[serde(rename = "session.start")]
    SessionStart(SessionStartEvent),
    #[serde(rename = "session.stop")]
    SessionStop(SessionStopEvent),
}

/// A subscriber handle. Dropping (or calling [`Subscription::close`]) stops
/// delivery; the bus prunes the now-closed channel lazily on its next
/// publish to that topic, so closing is cheap and idempotent.
pub struct Subscription {
    pub receiver: mpsc::Receiver<BusEvent>,
}

impl Subscription {
    pub fn close(self) {
        // Dropping `receiver` closes the channel from this end.
    }
}

#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    async fn publish(&self, topic: &str, event: BusEvent);
    async fn subscribe(&self, topic: &str) -> Subscription;
}

#[derive(Default)]
struct TopicState {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<BusEvent>>,
}

#[derive(Default)]
pub struct InMemoryEventBus {
    topics: RwLock<HashMap<String, TopicState>>,
}

impl InMemoryEventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, event: BusEvent) {
        let mut topics = self.topics.write().await;
        let Some(state) = topics.get_mut(topic) else {
            // Publish with no subscribers (or after all subscribers closed)
            // is a no-op (§4.4).
            return;
        };
        state.subscribers.retain(|_, sender| {
            match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(topic, "event bus: subscriber channel full, dropping delivery");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    async fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(64);
        let mut topics = self.topics.write().await;
        let state = topics.entry(topic.to_string()).or_default();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, tx);
        Subscription { receiver: rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscribers_is_noop() {
        let bus = InMemoryEventBus::new();
        bus.publish(
            "session.start",
            BusEvent::SessionStart(SessionStartEvent {
                session_id: "s1".into(),
                service_ref: "ref".into(),
                correlation_id: None,
                requested_at_unix: 0,
            }),
        )
        .await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe("session.start").await;

        bus.publish(
            "session.start",
            BusEvent::SessionStart(SessionStartEvent {
                session_id: "s1".into(),
                service_ref: "ref".into(),
                correlation_id: Some("corr-1".into()),
                requested_at_unix: 42,
            }),
        )
        .await;

        let event = sub.receiver.recv().await.expect("event delivered");
        match event {
            BusEvent::SessionStart(e) => assert_eq!(e.session_id, "s1"),
            _ => panic!("unexpected event"),
        }
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned_and_publish_after_close_is_harmless() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe("session.start").await;
        sub.close();

        bus.publish(
            "session.start",
            BusEvent::SessionStart(SessionStartEvent {
                session_id: "s1".into(),
                service_ref: "ref".into(),
                correlation_id: None,
                requested_at_unix: 0,
            }),
        )
        .await;

        let topics = bus.topics.read().await;
        assert!(topics.get("session.start").unwrap().subscribers.is_empty());
    }
}
