//! Event bus for async workflow communication
//!
//! Publish/subscribe of `(topic, payload)` pairs. Topics are flat strings
//! matched exactly. The engine uses two conventions: user topics (whatever an
//! `await_event.source` names) and internal `resume:<token>` topics that wake
//! paused runs.

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Callback invoked for every event on a subscribed topic
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Handle identifying one subscription for later removal
pub type SubscriptionId = Uuid;

/// Event bus trait for publishing and subscribing to events
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;

    /// Subscribe to a topic; the returned id unsubscribes later
    async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<SubscriptionId>;

    /// Remove a subscription by id (unknown ids are a no-op)
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

/// In-process event bus
///
/// Delivery is synchronous: every subscriber registered at publish time is
/// invoked before `publish` returns. The subscriber list is snapshotted
/// first, so one callback unsubscribing or re-publishing cannot starve its
/// peers.
pub struct InProcEventBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<(SubscriptionId, EventCallback)>>>>,
    topics_by_id: Arc<RwLock<HashMap<SubscriptionId, String>>>,
}

impl InProcEventBus {
    /// Create a new in-process event bus
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            topics_by_id: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InProcEventBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let callbacks: Vec<EventCallback> = self
            .subscribers
            .read()
            .get(topic)
            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        tracing::trace!(topic, subscribers = callbacks.len(), "publishing event");

        for callback in callbacks {
            callback(payload.clone());
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<SubscriptionId> {
        let id = Uuid::new_v4();
        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((id, callback));
        self.topics_by_id.write().insert(id, topic.to_string());
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let Some(topic) = self.topics_by_id.write().remove(&id) else {
            return Ok(());
        };

        let mut subscribers = self.subscribers.write();
        if let Some(subs) = subscribers.get_mut(&topic) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                subscribers.remove(&topic);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod event_test;
