// In-memory lock store
// Provides atomic acquire-if-free and release-if-owner with automatic expiry

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use lockbell_common::{Context, Result};

use crate::store::{LockStore, RetryPolicy};

/// Expiry used when `now + ttl` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// A live lock record
struct LockEntry {
    owner: String,
    expires_at: Instant,
}

impl LockEntry {
    fn new(owner: &str, ttl: Duration, now: Instant) -> Self {
        Self {
            owner: owner.to_string(),
            expires_at: expiry_after(now, ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Snapshot of store activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    pub total_acquisitions: u64,
    pub failed_acquisitions: u64,
    pub total_releases: u64,
    pub failed_releases: u64,
    pub total_extensions: u64,
    pub expired_locks: u64,
    pub active_locks: u64,
}

#[derive(Default)]
struct LockStatsCollector {
    total_acquisitions: AtomicU64,
    failed_acquisitions: AtomicU64,
    total_releases: AtomicU64,
    failed_releases: AtomicU64,
    total_extensions: AtomicU64,
    expired_locks: AtomicU64,
}

/// Lock store backed by a `DashMap`, shared by every mutex given the same `Arc`
pub struct MemoryLockStore {
    locks: Arc<DashMap<String, LockEntry>>,
    stats: Arc<LockStatsCollector>,
    retry: RetryPolicy,
    sweeper: Option<JoinHandle<()>>,
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            stats: Arc::new(LockStatsCollector::default()),
            retry: RetryPolicy::default(),
            sweeper: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Start a background task that purges expired records every `interval`.
    ///
    /// Must be called inside a tokio runtime. The task stops when the store is dropped.
    /// A zero interval is rejected and no sweeper is started.
    pub fn with_expiry_sweeper(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!("Ignoring zero expiry sweep interval, sweeper not started");
            return self;
        }

        let locks = self.locks.clone();
        let stats = self.stats.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = Self::purge_expired(&locks);
                if purged > 0 {
                    stats.expired_locks.fetch_add(purged, Ordering::Relaxed);
                    debug!(count = purged, "Cleaned up expired lock entries");
                }
            }
        });

        if let Some(previous) = self.sweeper.replace(handle) {
            previous.abort();
        }

        info!(
            interval_ms = interval.as_millis() as u64,
            "MemoryLockStore expiry sweeper started"
        );
        self
    }

    fn purge_expired(locks: &DashMap<String, LockEntry>) -> u64 {
        let now = Instant::now();
        let mut purged = 0;
        locks.retain(|_, entry| {
            if entry.is_expired(now) {
                purged += 1;
                false
            } else {
                true
            }
        });
        purged
    }

    pub fn stats(&self) -> LockStats {
        let now = Instant::now();
        let active_locks = self
            .locks
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count() as u64;

        LockStats {
            total_acquisitions: self.stats.total_acquisitions.load(Ordering::Relaxed),
            failed_acquisitions: self.stats.failed_acquisitions.load(Ordering::Relaxed),
            total_releases: self.stats.total_releases.load(Ordering::Relaxed),
            failed_releases: self.stats.failed_releases.load(Ordering::Relaxed),
            total_extensions: self.stats.total_extensions.load(Ordering::Relaxed),
            expired_locks: self.stats.expired_locks.load(Ordering::Relaxed),
            active_locks,
        }
    }
}

impl Drop for MemoryLockStore {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire_non_blocking(
        &self,
        ctx: &Context,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        ctx.check()?;
        let now = Instant::now();

        let acquired = match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now) {
                    self.stats.expired_locks.fetch_add(1, Ordering::Relaxed);
                    entry.insert(LockEntry::new(owner, ttl, now));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(LockEntry::new(owner, ttl, now));
                true
            }
        };

        if acquired {
            self.stats.total_acquisitions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, owner = %owner, "Lock acquired");
        } else {
            self.stats.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(acquired)
    }

    async fn release(&self, ctx: &Context, key: &str, owner: &str) -> Result<bool> {
        ctx.check()?;
        let now = Instant::now();

        let released = self
            .locks
            .remove_if(key, |_, entry| entry.owner == owner && !entry.is_expired(now))
            .is_some();

        if released {
            self.stats.total_releases.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, owner = %owner, "Lock released");
        } else {
            self.stats.failed_releases.fetch_add(1, Ordering::Relaxed);
        }
        Ok(released)
    }

    async fn remaining_ttl(&self, ctx: &Context, key: &str) -> Result<Duration> {
        ctx.check()?;
        let now = Instant::now();

        Ok(self
            .locks
            .get(key)
            .map(|entry| entry.expires_at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO))
    }

    async fn extend(&self, ctx: &Context, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        ctx.check()?;
        let now = Instant::now();

        let extended = match self.locks.get_mut(key) {
            Some(mut entry) if entry.owner == owner && !entry.is_expired(now) => {
                entry.expires_at = expiry_after(now, ttl);
                true
            }
            _ => false,
        };

        if extended {
            self.stats.total_extensions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, owner = %owner, ttl_ms = ttl.as_millis() as u64, "Lock extended");
        }
        Ok(extended)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbell_common::{ContextError, LockbellError};

    const TTL: Duration = Duration::from_secs(60);

    fn ctx() -> Context {
        Context::background()
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = MemoryLockStore::new();

        assert!(store.acquire_non_blocking(&ctx(), "key1", "owner1", TTL).await.unwrap());
        assert!(store.release(&ctx(), "key1", "owner1").await.unwrap());
        assert_eq!(store.remaining_ttl(&ctx(), "key1").await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_acquire_conflict() {
        let store = MemoryLockStore::new();

        assert!(store.acquire_non_blocking(&ctx(), "key1", "owner1", TTL).await.unwrap());
        // Another owner cannot acquire
        assert!(!store.acquire_non_blocking(&ctx(), "key1", "owner2", TTL).await.unwrap());
        // Neither can the holder: a record is created only when none is live
        assert!(!store.acquire_non_blocking(&ctx(), "key1", "owner1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_wrong_owner() {
        let store = MemoryLockStore::new();

        assert!(store.acquire_non_blocking(&ctx(), "key1", "owner1", TTL).await.unwrap());
        // Wrong owner cannot release
        assert!(!store.release(&ctx(), "key1", "owner2").await.unwrap());
        // Correct owner can release
        assert!(store.release(&ctx(), "key1", "owner1").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_nonexistent() {
        let store = MemoryLockStore::new();
        assert!(!store.release(&ctx(), "nonexistent", "owner1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_after_expiry() {
        let store = MemoryLockStore::new();

        assert!(
            store
                .acquire_non_blocking(&ctx(), "key1", "owner1", Duration::from_secs(1))
                .await
                .unwrap()
        );
        tokio::time::advance(Duration::from_millis(1500)).await;

        // Expired owner can no longer release, and another owner can now acquire
        assert!(!store.release(&ctx(), "key1", "owner1").await.unwrap());
        assert!(store.acquire_non_blocking(&ctx(), "key1", "owner2", TTL).await.unwrap());
        assert_eq!(store.stats().expired_locks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_ttl_counts_down() {
        let store = MemoryLockStore::new();
        store
            .acquire_non_blocking(&ctx(), "key1", "owner1", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            store.remaining_ttl(&ctx(), "key1").await.unwrap(),
            Duration::from_secs(6)
        );

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(store.remaining_ttl(&ctx(), "key1").await.unwrap(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend() {
        let store = MemoryLockStore::new();
        store
            .acquire_non_blocking(&ctx(), "key1", "owner1", Duration::from_secs(2))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!store.extend(&ctx(), "key1", "owner2", TTL).await.unwrap());
        assert!(store.extend(&ctx(), "key1", "owner1", Duration::from_secs(5)).await.unwrap());
        assert_eq!(
            store.remaining_ttl(&ctx(), "key1").await.unwrap(),
            Duration::from_secs(5)
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!store.extend(&ctx(), "key1", "owner1", TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocking_waits_for_expiry() {
        let store = MemoryLockStore::new().with_retry_policy(RetryPolicy {
            tries: 100,
            delay: Duration::from_millis(100),
            jitter: Duration::ZERO,
        });
        store
            .acquire_non_blocking(&ctx(), "key1", "owner1", Duration::from_secs(1))
            .await
            .unwrap();

        let start = Instant::now();
        store.acquire_blocking(&ctx(), "key1", "owner2", TTL).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocking_exhausts_retries() {
        let store = MemoryLockStore::new().with_retry_policy(RetryPolicy {
            tries: 3,
            delay: Duration::from_millis(10),
            jitter: Duration::ZERO,
        });
        store
            .acquire_non_blocking(&ctx(), "key1", "owner1", TTL)
            .await
            .unwrap();

        let err = store
            .acquire_blocking(&ctx(), "key1", "owner2", TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, LockbellError::RetriesExhausted(3)));
        assert_eq!(store.stats().failed_acquisitions, 3);
    }

    #[tokio::test]
    async fn test_ended_context_is_rejected() {
        let store = MemoryLockStore::new();
        let ctx = Context::background();
        ctx.cancel();

        let err = store
            .acquire_non_blocking(&ctx, "key1", "owner1", TTL)
            .await
            .unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::Canceled));
        assert!(store.remaining_ttl(&ctx, "key1").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_sweeper_purges_records() {
        let store = MemoryLockStore::new().with_expiry_sweeper(Duration::from_secs(1));
        store
            .acquire_non_blocking(&ctx(), "key1", "owner1", Duration::from_millis(500))
            .await
            .unwrap();
        store
            .acquire_non_blocking(&ctx(), "key2", "owner1", TTL)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(store.locks.len(), 1);
        let stats = store.stats();
        assert_eq!(stats.expired_locks, 1);
        assert_eq!(stats.active_locks, 1);
        assert_eq!(stats.total_acquisitions, 2);
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_is_rejected() {
        let store = MemoryLockStore::new().with_expiry_sweeper(Duration::ZERO);
        assert!(store.sweeper.is_none());

        let store = store.with_expiry_sweeper(Duration::from_secs(1));
        assert!(store.sweeper.is_some());
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_does_not_overflow() {
        let store = MemoryLockStore::new();

        assert!(store.acquire_non_blocking(&ctx(), "key1", "owner1", Duration::MAX).await.unwrap());
        assert!(store.remaining_ttl(&ctx(), "key1").await.unwrap() > Duration::from_secs(86400 * 365));
        assert!(!store.acquire_non_blocking(&ctx(), "key1", "owner2", TTL).await.unwrap());

        assert!(store.extend(&ctx(), "key1", "owner1", Duration::MAX).await.unwrap());
        assert!(store.release(&ctx(), "key1", "owner1").await.unwrap());
    }
}
