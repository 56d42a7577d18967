//! Notification channel
//!
//! A `NotificationChannel` is a named, many-publisher/many-subscriber wake-up
//! signal over one bus topic. It carries no delivery guarantee: callers that
//! block on it must also bound their wait some other way.
//!
//! # Subscription race
//!
//! A payload pushed before a listener's subscription is confirmed is lost.
//! [`NotificationChannel::subscribe`] therefore waits for confirmation before
//! returning, so a caller can finish subscribing and only then let a concurrent
//! signaler run.
//!
//! # Handle-local close
//!
//! The `closed` flag belongs to this handle (and its clones) only. Closing it
//! publishes the sentinel so every listener on the topic wakes, but other
//! handles on the same topic stay usable and new ones can always be created.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lockbell_common::{Context, LockbellError, Result, notify_topic};

use crate::traits::{Bus, Subscription};

/// Payload carried on a notification topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Signal {
    /// An ordinary wake-up message
    Message(String),
    /// Sentinel: the publishing handle was torn down
    Closed,
}

impl Signal {
    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Handle on a notification topic
#[derive(Clone)]
pub struct NotificationChannel {
    bus: Arc<dyn Bus>,
    topic: String,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("topic", &self.topic)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl NotificationChannel {
    pub fn new(bus: Arc<dyn Bus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle on the notification topic of a lock resource key
    pub fn for_key(bus: Arc<dyn Bus>, key: &str) -> Self {
        Self::new(bus, notify_topic(key))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Publish `message` to every current listener.
    ///
    /// Succeeds even when nobody was listening.
    pub async fn push(&self, message: impl Into<String>) -> Result<()> {
        if self.is_closed() {
            return Err(LockbellError::ChannelClosed);
        }

        let payload = Signal::Message(message.into()).encode()?;
        let receivers = self.bus.publish(&self.topic, payload).await?;
        debug!(topic = %self.topic, receivers, "Pushed notification");
        Ok(())
    }

    /// Subscribe and wait for the bus to confirm the subscription
    pub async fn subscribe(&self, ctx: &Context) -> Result<Listener> {
        if self.is_closed() {
            return Err(LockbellError::ChannelClosed);
        }

        let subscription = ctx.run(self.bus.subscribe(&self.topic)).await??;
        let mut listener = Listener { subscription };
        ctx.run(listener.subscription.confirmed()).await??;

        debug!(topic = %self.topic, "Listener subscribed");
        Ok(listener)
    }

    /// Block until a message arrives, the channel is closed, or `ctx` ends.
    ///
    /// Returns the message, `ChannelClosed` on the sentinel, or the context's error.
    pub async fn listen(&self, ctx: &Context) -> Result<String> {
        let mut listener = self.subscribe(ctx).await?;
        listener.recv(ctx).await
    }

    /// Publish the sentinel and mark this handle closed.
    ///
    /// The publish is best effort; a bus failure is logged and otherwise ignored.
    pub async fn close(&self) {
        let published = match Signal::Closed.encode() {
            Ok(payload) => self.bus.publish(&self.topic, payload).await,
            Err(e) => Err(e),
        };

        match published {
            Ok(receivers) => debug!(topic = %self.topic, receivers, "Channel closed"),
            Err(e) => debug!(topic = %self.topic, error = %e, "Channel closed without sentinel"),
        }

        self.closed.store(true, Ordering::Release);
    }
}

/// A confirmed subscription on a notification topic.
///
/// Dropping the listener releases the subscription.
pub struct Listener {
    subscription: Box<dyn Subscription>,
}

impl Listener {
    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }

    /// Wait for the next message, the sentinel, or the end of `ctx`.
    pub async fn recv(&mut self, ctx: &Context) -> Result<String> {
        loop {
            let payload = ctx.run(self.subscription.receive()).await??;

            match Signal::decode(&payload) {
                Ok(Signal::Message(message)) => return Ok(message),
                Ok(Signal::Closed) => return Err(LockbellError::ChannelClosed),
                Err(e) => {
                    warn!(
                        topic = %self.subscription.topic(),
                        error = %e,
                        "Skipping undecodable notification payload"
                    );
                }
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;

    #[test]
    fn test_signal_wire_format() {
        let encoded = Signal::Message("hello".to_string()).encode().unwrap();
        assert_eq!(&encoded[..], br#"{"type":"message","payload":"hello"}"#);

        let encoded = Signal::Closed.encode().unwrap();
        assert_eq!(&encoded[..], br#"{"type":"closed"}"#);
    }

    #[test]
    fn test_sentinel_never_collides_with_messages() {
        // Even a message whose text looks like the sentinel stays a message
        let tricky = Signal::Message(r#"{"type":"closed"}"#.to_string());
        let decoded = Signal::decode(&tricky.encode().unwrap()).unwrap();
        assert_eq!(decoded, tricky);
    }

    #[test]
    fn test_for_key_topic() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let channel = NotificationChannel::for_key(bus, "orders");
        assert_eq!(channel.topic(), "lock-notify:orders");
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_push_then_listen() {
        let bus = MemoryBus::new();
        let channel = NotificationChannel::new(Arc::new(bus.clone()), "t");
        let ctx = Context::background();

        let mut listener = channel.subscribe(&ctx).await.unwrap();
        assert_eq!(listener.topic(), "t");
        assert_eq!(bus.subscriber_count("t"), 1);

        channel.push("wake").await.unwrap();
        assert_eq!(listener.recv(&ctx).await.unwrap(), "wake");

        drop(listener);
        assert_eq!(bus.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_use() {
        let channel = NotificationChannel::new(Arc::new(MemoryBus::new()), "t");
        channel.close().await;
        assert!(channel.is_closed());

        let ctx = Context::background();
        assert!(channel.push("x").await.unwrap_err().is_channel_closed());
        assert!(channel.listen(&ctx).await.unwrap_err().is_channel_closed());
    }

    #[tokio::test]
    async fn test_clone_shares_closed_flag() {
        let channel = NotificationChannel::new(Arc::new(MemoryBus::new()), "t");
        let clone = channel.clone();
        channel.close().await;
        assert!(clone.is_closed());
    }
}
