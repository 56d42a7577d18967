//! Publish/subscribe transport contract
//!
//! Delivery is at-most-once and non-persistent: a payload published while a
//! topic has no confirmed subscriber is lost.

use async_trait::async_trait;
use bytes::Bytes;

use lockbell_common::Result;

/// A publish/subscribe transport
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish `payload` to `topic`, returning how many subscribers it reached.
    ///
    /// Reaching zero subscribers is not an error.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize>;

    /// Open a subscription on `topic`.
    ///
    /// The subscription may not be live until [`Subscription::confirmed`] resolves.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;
}

/// One open subscription on a bus topic
#[async_trait]
pub trait Subscription: Send {
    fn topic(&self) -> &str;

    /// Resolves once the transport has confirmed the subscription.
    async fn confirmed(&mut self) -> Result<()>;

    /// Wait for the next payload.
    ///
    /// Cancel by dropping the future; the subscription stays usable.
    async fn receive(&mut self) -> Result<Bytes>;

    /// Release the subscription. Must be idempotent.
    fn unsubscribe(&mut self);
}
