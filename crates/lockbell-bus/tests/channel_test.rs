//! Notification channel tests
//!
//! Exercise `NotificationChannel` against the in-memory bus and against a bus
//! whose transport is down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lockbell_bus::{Bus, MemoryBus, NotificationChannel, Subscription};
use lockbell_common::{Context, ContextError, LockbellError, Result};

async fn wait_for_subscribers(bus: &MemoryBus, topic: &str, expected: usize) {
    while bus.subscriber_count(topic) < expected {
        tokio::task::yield_now().await;
    }
}

/// Bus whose transport always fails
struct OfflineBus;

#[async_trait]
impl Bus for OfflineBus {
    async fn publish(&self, _topic: &str, _payload: Bytes) -> Result<usize> {
        Err(LockbellError::transport("bus offline"))
    }

    async fn subscribe(&self, _topic: &str) -> Result<Box<dyn Subscription>> {
        Err(LockbellError::transport("bus offline"))
    }
}

// ============== Close Semantics ==============

#[tokio::test]
async fn test_close_wakes_every_listener_exactly_once() {
    let bus = MemoryBus::new();
    let channel = NotificationChannel::new(Arc::new(bus.clone()), "lock-notify:k");

    let mut listeners = Vec::new();
    for _ in 0..3 {
        let channel = channel.clone();
        listeners.push(tokio::spawn(async move {
            channel.listen(&Context::background()).await
        }));
    }
    wait_for_subscribers(&bus, "lock-notify:k", 3).await;

    channel.close().await;

    for listener in listeners {
        let result = tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should wake")
            .unwrap();
        assert!(matches!(result, Err(LockbellError::ChannelClosed)));
    }

    // Every listener returned and released its subscription
    assert_eq!(bus.subscriber_count("lock-notify:k"), 0);
}

#[tokio::test]
async fn test_close_reaches_listeners_on_other_handles() {
    let bus = MemoryBus::new();
    let shared: Arc<dyn Bus> = Arc::new(bus.clone());
    let closer = NotificationChannel::for_key(shared.clone(), "orders");
    let waiter = NotificationChannel::for_key(shared, "orders");

    let task = {
        let waiter = waiter.clone();
        tokio::spawn(async move { waiter.listen(&Context::background()).await })
    };
    wait_for_subscribers(&bus, "lock-notify:orders", 1).await;

    closer.close().await;
    assert!(task.await.unwrap().unwrap_err().is_channel_closed());

    // Only the closing handle is closed; the other can keep going
    assert!(closer.is_closed());
    assert!(!waiter.is_closed());
    waiter.push("still alive").await.unwrap();
}

#[tokio::test]
async fn test_new_handle_after_close_is_usable() {
    let bus = MemoryBus::new();
    let shared: Arc<dyn Bus> = Arc::new(bus.clone());

    let first = NotificationChannel::for_key(shared.clone(), "k");
    first.close().await;

    let second = NotificationChannel::for_key(shared, "k");
    let ctx = Context::background();
    let mut listener = second.subscribe(&ctx).await.unwrap();
    second.push("next cycle").await.unwrap();
    assert_eq!(listener.recv(&ctx).await.unwrap(), "next cycle");
}

// ============== Delivery ==============

#[tokio::test]
async fn test_push_without_listeners_succeeds() {
    let channel = NotificationChannel::new(Arc::new(MemoryBus::new()), "nobody");
    channel.push("into the void").await.unwrap();
}

#[tokio::test]
async fn test_message_reaches_every_listener() {
    let bus = MemoryBus::new();
    let channel = NotificationChannel::new(Arc::new(bus.clone()), "t");
    let ctx = Context::background();

    let mut a = channel.subscribe(&ctx).await.unwrap();
    let mut b = channel.subscribe(&ctx).await.unwrap();
    channel.push("go").await.unwrap();

    assert_eq!(a.recv(&ctx).await.unwrap(), "go");
    assert_eq!(b.recv(&ctx).await.unwrap(), "go");
}

#[tokio::test]
async fn test_undecodable_payload_is_skipped() {
    let bus = MemoryBus::new();
    let channel = NotificationChannel::new(Arc::new(bus.clone()), "t");
    let ctx = Context::background();

    let mut listener = channel.subscribe(&ctx).await.unwrap();
    bus.publish("t", Bytes::from_static(b"not json")).await.unwrap();
    channel.push("real").await.unwrap();

    assert_eq!(listener.recv(&ctx).await.unwrap(), "real");
}

// ============== Cancellation ==============

#[tokio::test(start_paused = true)]
async fn test_listen_deadline_releases_subscription() {
    let bus = MemoryBus::new();
    let channel = NotificationChannel::new(Arc::new(bus.clone()), "t");
    let ctx = Context::background().with_timeout(Duration::from_millis(50));

    let err = channel.listen(&ctx).await.unwrap_err();
    assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
    assert_eq!(bus.subscriber_count("t"), 0);
}

#[tokio::test]
async fn test_listen_cancel_releases_subscription() {
    let bus = MemoryBus::new();
    let channel = NotificationChannel::new(Arc::new(bus.clone()), "t");
    let ctx = Context::background();

    let task = {
        let channel = channel.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { channel.listen(&ctx).await })
    };
    wait_for_subscribers(&bus, "t", 1).await;

    ctx.cancel();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, LockbellError::Context(ContextError::Canceled)));
    assert_eq!(bus.subscriber_count("t"), 0);
}

// ============== Transport Failures ==============

#[tokio::test]
async fn test_transport_failures_surface() {
    let channel = NotificationChannel::new(Arc::new(OfflineBus), "t");

    assert!(channel.push("x").await.unwrap_err().is_transport());
    assert!(
        channel
            .listen(&Context::background())
            .await
            .unwrap_err()
            .is_transport()
    );
}

#[tokio::test]
async fn test_close_ignores_transport_failure() {
    let channel = NotificationChannel::new(Arc::new(OfflineBus), "t");
    channel.close().await;
    assert!(channel.is_closed());
}
