//! Lockbell Bus - best-effort wake-up signaling
//!
//! This crate provides:
//! - The `Bus` / `Subscription` contract consumed from a publish/subscribe transport
//! - `MemoryBus`, an in-process implementation backed by tokio broadcast channels
//! - `NotificationChannel`, a named signal over a bus topic used to wake lock waiters

pub mod channel;
pub mod memory;
pub mod traits;

pub use channel::{Listener, NotificationChannel, Signal};
pub use memory::MemoryBus;
pub use traits::{Bus, Subscription};
