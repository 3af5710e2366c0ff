//! Subscription registry
//!
//! The registry is the single record of what the client believes it is
//! subscribed to. Replay after reconnect and message routing both read from it.

use crate::transport::QoS;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handler invoked with `(topic, payload_text)` for every message on a topic
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// One registered subscription
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub topic: String,
    pub qos: QoS,
    pub handler: MessageCallback,
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Topic → subscription mapping shared between operations and event handling
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `topic`
    pub async fn insert(&self, topic: &str, qos: QoS, handler: MessageCallback) {
        let entry = SubscriptionEntry {
            topic: topic.to_string(),
            qos,
            handler,
        };
        self.entries.write().await.insert(topic.to_string(), entry);
    }

    /// Remove the entry for `topic`, returning it if present
    pub async fn remove(&self, topic: &str) -> Option<SubscriptionEntry> {
        self.entries.write().await.remove(topic)
    }

    pub async fn contains(&self, topic: &str) -> bool {
        self.entries.read().await.contains_key(topic)
    }

    pub async fn handler(&self, topic: &str) -> Option<MessageCallback> {
        self.entries
            .read()
            .await
            .get(topic)
            .map(|entry| entry.handler.clone())
    }

    pub async fn qos(&self, topic: &str) -> Option<QoS> {
        self.entries.read().await.get(topic).map(|entry| entry.qos)
    }

    /// Current topic list, sorted for stable output
    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.entries.read().await.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// `(topic, qos)` pairs to re-issue after a reconnect
    pub async fn replay_plan(&self) -> Vec<(String, QoS)> {
        let mut plan: Vec<(String, QoS)> = self
            .entries
            .read()
            .await
            .values()
            .map(|entry| (entry.topic.clone(), entry.qos))
            .collect();
        plan.sort();
        plan
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
