//! Lock configuration
//!
//! Plain values passed in by the caller. Durations are carried in
//! milliseconds so the struct deserializes from any `config` source.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use lockbell_common::DEFAULT_LOCK_TTL;

use crate::store::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lock record time-to-live
    pub ttl_ms: u64,
    /// Attempts made by a blocking acquire
    pub retry_tries: u32,
    /// Fixed pause between blocking-acquire attempts
    pub retry_delay_ms: u64,
    /// Upper bound of the random pause added between attempts
    pub retry_jitter_ms: u64,
    /// Per-topic buffer of the in-memory bus
    pub bus_capacity: usize,
    /// Expired-record sweep interval of the in-memory store (0 = no sweeper)
    pub sweep_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            ttl_ms: DEFAULT_LOCK_TTL.as_millis() as u64,
            retry_tries: retry.tries,
            retry_delay_ms: retry.delay.as_millis() as u64,
            retry_jitter_ms: retry.jitter.as_millis() as u64,
            bus_capacity: lockbell_bus::memory::DEFAULT_BUS_CAPACITY,
            sweep_interval_ms: 5000,
        }
    }
}

impl LockConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            tries: self.retry_tries,
            delay: Duration::from_millis(self.retry_delay_ms),
            jitter: Duration::from_millis(self.retry_jitter_ms),
        }
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.sweep_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
