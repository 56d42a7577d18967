// In-memory publish/subscribe bus
// One broadcast channel per topic, created on first subscribe and dropped with the last subscriber

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace, warn};

use lockbell_common::{LockbellError, Result};

use crate::traits::{Bus, Subscription};

/// Default per-topic buffer size
pub const DEFAULT_BUS_CAPACITY: usize = 64;

type TopicMap = DashMap<String, broadcast::Sender<Bytes>>;

/// In-process bus shared by every handle cloned from it
#[derive(Clone)]
pub struct MemoryBus {
    topics: Arc<TopicMap>,
    capacity: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus whose topics buffer up to `capacity` undelivered payloads per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of topics with at least one live subscription
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize> {
        let sender = match self.topics.get(topic) {
            Some(sender) => sender.clone(),
            None => {
                trace!(topic = %topic, "Published to topic with no subscribers");
                return Ok(0);
            }
        };

        // A send error only means every receiver went away in the meantime
        let receivers = sender.send(payload).unwrap_or(0);
        trace!(topic = %topic, receivers, "Published payload");
        Ok(receivers)
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let rx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        debug!(topic = %topic, "Subscribed");

        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            rx: Some(rx),
            topics: self.topics.clone(),
        }))
    }
}

struct MemorySubscription {
    topic: String,
    rx: Option<broadcast::Receiver<Bytes>>,
    topics: Arc<TopicMap>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn confirmed(&mut self) -> Result<()> {
        // The receiver is registered with the sender as soon as it exists
        match self.rx {
            Some(_) => Ok(()),
            None => Err(LockbellError::transport("subscription already released")),
        }
    }

    async fn receive(&mut self) -> Result<Bytes> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| LockbellError::transport("subscription already released"))?;

        loop {
            match rx.recv().await {
                Ok(payload) => return Ok(payload),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged, skipping payloads");
                }
                Err(RecvError::Closed) => {
                    return Err(LockbellError::transport(format!(
                        "topic '{}' closed",
                        self.topic
                    )));
                }
            }
        }
    }

    fn unsubscribe(&mut self) {
        if self.rx.take().is_none() {
            return;
        }

        self.topics
            .remove_if(&self.topic, |_, sender| sender.receiver_count() == 0);
        debug!(topic = %self.topic, "Unsubscribed");
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
