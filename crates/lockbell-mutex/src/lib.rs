//! Lockbell Mutex - distributed mutual exclusion with wait-notification
//!
//! This crate provides:
//! - The `LockStore` contract over an external distributed-lock algorithm
//! - `MemoryLockStore`, an in-process store with expiry and statistics
//! - `DistributedMutex`, the Lock/TryLock/Unlock/WaitUntilUnlocked/LockedUntil protocol
//! - `LockClient`, which hands out mutex handles over an injected store and bus
//!
//! # Example
//!
//! ```ignore
//! use lockbell_mutex::{LockClient, LockConfig, MemoryLockStore};
//! use lockbell_bus::MemoryBus;
//! use lockbell_common::Context;
//!
//! let client = LockClient::new(
//!     Arc::new(MemoryLockStore::new()),
//!     Arc::new(MemoryBus::new()),
//!     LockConfig::default(),
//! );
//! let ctx = Context::background();
//! let mut mutex = client.new_mutex("orders");
//!
//! while !mutex.try_lock(&ctx).await? {
//!     mutex.wait_until_unlocked(&ctx).await?;
//! }
//! // critical section
//! mutex.unlock(&ctx).await?;
//! ```

pub mod client;
pub mod config;
pub mod memory;
pub mod mutex;
pub mod store;

pub use client::LockClient;
pub use config::LockConfig;
pub use memory::{LockStats, MemoryLockStore};
pub use mutex::{DistributedMutex, MutexState};
pub use store::{LockStore, RetryPolicy};
