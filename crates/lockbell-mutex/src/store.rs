//! Lock Store contract
//!
//! Normalizes an external distributed-lock algorithm (Redlock-style
//! acquire-if-free-with-expiry and release-if-owner) into a handful of
//! operations. Mutual exclusion is the store's job alone: callers never decide
//! ownership from their own memory.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::trace;

use lockbell_common::{Context, LockbellError, Result};

/// How `acquire_blocking` retries a held lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub tries: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
    /// Upper bound of the random pause added to `delay`
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 32,
            delay: Duration::from_millis(50),
            jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Pause before the next attempt
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Distributed lock store
#[async_trait]
pub trait LockStore: Send + Sync {
    /// One attempt to create the lock record for `key`.
    ///
    /// `Ok(false)` means another owner holds a live record; that is not an error.
    async fn acquire_non_blocking(
        &self,
        ctx: &Context,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Delete the record for `key` if `owner` still holds it.
    ///
    /// `Ok(false)` means `owner` does not hold a live record.
    async fn release(&self, ctx: &Context, key: &str, owner: &str) -> Result<bool>;

    /// Time left before the record for `key` auto-expires; zero when unlocked
    async fn remaining_ttl(&self, ctx: &Context, key: &str) -> Result<Duration>;

    /// Push the expiry of a record `owner` still holds to `now + ttl`
    async fn extend(&self, ctx: &Context, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Retry `acquire_non_blocking` per [`LockStore::retry_policy`] until it succeeds,
    /// `ctx` ends, an infrastructure error occurs, or the attempts run out.
    async fn acquire_blocking(
        &self,
        ctx: &Context,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<()> {
        let policy = self.retry_policy();
        let tries = policy.tries.max(1);

        for attempt in 1..=tries {
            ctx.check()?;

            if self.acquire_non_blocking(ctx, key, owner, ttl).await? {
                return Ok(());
            }

            if attempt < tries {
                let delay = policy.next_delay();
                trace!(key = %key, attempt, delay_ms = delay.as_millis() as u64, "Lock busy, retrying");
                ctx.run(tokio::time::sleep(delay)).await?;
            }
        }

        Err(LockbellError::RetriesExhausted(tries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.tries, 32);
        assert_eq!(policy.delay, Duration::from_millis(50));
        assert_eq!(policy.jitter, Duration::from_millis(200));
    }

    #[test]
    fn test_next_delay_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_next_delay_without_jitter() {
        let policy = RetryPolicy {
            tries: 3,
            delay: Duration::from_millis(10),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.next_delay(), Duration::from_millis(10));
    }
}
