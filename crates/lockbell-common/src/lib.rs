//! Lockbell Common - Shared types for the Lockbell crates
//!
//! This crate provides the foundational types used across all Lockbell components:
//! - Error taxonomy shared by the bus, store, and mutex layers
//! - A cancellable `Context` passed to every blocking operation
//! - Topic naming for lock notification channels

pub mod context;
pub mod error;

// Re-exports for convenience
pub use context::{Context, ContextError};
pub use error::{LockbellError, Result};

use std::time::Duration;

/// Prefix of the bus topic that carries unlock notifications for a resource key
pub const NOTIFY_TOPIC_PREFIX: &str = "lock-notify:";

/// Default lock TTL when none is configured
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(8);

/// Derive the notification topic for a resource key.
///
/// The mapping is deterministic and injective, so every process that locks the
/// same key talks on the same topic and no two keys share one.
pub fn notify_topic(key: &str) -> String {
    format!("{}{}", NOTIFY_TOPIC_PREFIX, key)
}
