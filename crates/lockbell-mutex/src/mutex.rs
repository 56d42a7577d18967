//! Distributed mutex with blocking wait-notification
//!
//! A `DistributedMutex` is one process's handle on a named lock. Acquisition
//! and release are decided by the [`LockStore`]; the handle only remembers what
//! it has observed. A successful [`DistributedMutex::unlock`] closes the
//! handle's notification channel, which publishes the sentinel on
//! `lock-notify:<key>` and wakes every [`DistributedMutex::wait_until_unlocked`]
//! caller on that key, in any process. Waiters that miss the notification fall
//! back to the lock's TTL.
//!
//! Methods that touch the notification channel take `&mut self`: one handle
//! serves one caller at a time. Create one mutex per concurrent caller, even
//! within a single process.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use lockbell_bus::{Bus, NotificationChannel};
use lockbell_common::{Context, LockbellError, Result, notify_topic};

use crate::store::LockStore;

/// Lock state as observed by this handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    /// Never attempted
    Idle,
    /// Acquired by this handle and not yet released
    Held,
    /// Held elsewhere, lost, or released
    NotHeld,
}

impl std::fmt::Display for MutexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutexState::Idle => write!(f, "IDLE"),
            MutexState::Held => write!(f, "HELD"),
            MutexState::NotHeld => write!(f, "NOT_HELD"),
        }
    }
}

pub struct DistributedMutex {
    key: String,
    ttl: Duration,
    owner: String,
    store: Arc<dyn LockStore>,
    bus: Arc<dyn Bus>,
    channel: Option<NotificationChannel>,
    state: MutexState,
}

impl std::fmt::Debug for DistributedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedMutex")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("owner", &self.owner)
            .field("state", &self.state)
            .finish()
    }
}

impl DistributedMutex {
    /// Create a handle on `key`. Each handle gets its own owner token.
    pub fn new(
        key: impl Into<String>,
        ttl: Duration,
        store: Arc<dyn LockStore>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Self {
            key: key.into(),
            ttl,
            owner: Uuid::new_v4().to_string(),
            store,
            bus,
            channel: None,
            state: MutexState::Idle,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Owner token presented to the store
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> MutexState {
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state == MutexState::Held
    }

    /// Notification topic shared by every handle on this key
    pub fn topic(&self) -> String {
        notify_topic(&self.key)
    }

    /// Block until the lock is acquired.
    ///
    /// Fails with `LockAcquisitionFailed` when the store gives up, errors, or `ctx` ends.
    pub async fn lock(&mut self, ctx: &Context) -> Result<()> {
        match self
            .store
            .acquire_blocking(ctx, &self.key, &self.owner, self.ttl)
            .await
        {
            Ok(()) => {
                self.state = MutexState::Held;
                debug!(key = %self.key, owner = %self.owner, "Mutex locked");
                Ok(())
            }
            Err(e) => {
                self.mark_not_held();
                debug!(key = %self.key, error = %e, "Mutex lock failed");
                Err(LockbellError::acquisition_failed(&self.key, e))
            }
        }
    }

    /// Make exactly one acquisition attempt.
    ///
    /// `Ok(false)` means the lock is held elsewhere.
    pub async fn try_lock(&mut self, ctx: &Context) -> Result<bool> {
        match self
            .store
            .acquire_non_blocking(ctx, &self.key, &self.owner, self.ttl)
            .await
        {
            Ok(true) => {
                self.state = MutexState::Held;
                debug!(key = %self.key, owner = %self.owner, "Mutex locked");
                Ok(true)
            }
            Ok(false) => {
                self.mark_not_held();
                trace!(key = %self.key, "Mutex held elsewhere");
                Ok(false)
            }
            Err(e) => {
                self.mark_not_held();
                Err(LockbellError::acquisition_failed(&self.key, e))
            }
        }
    }

    /// Release the lock and wake every waiter on this key.
    ///
    /// Fails with `LockReleaseFailed` when this handle does not own a live record,
    /// leaving the handle's state untouched.
    pub async fn unlock(&mut self, ctx: &Context) -> Result<()> {
        match self.store.release(ctx, &self.key, &self.owner).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(LockbellError::release_failed(
                    &self.key,
                    LockbellError::NotOwner,
                ));
            }
            Err(e) => return Err(LockbellError::release_failed(&self.key, e)),
        }

        self.state = MutexState::NotHeld;

        let channel = self.notification_channel();
        self.channel = None;
        channel.close().await;

        debug!(key = %self.key, owner = %self.owner, "Mutex unlocked");
        Ok(())
    }

    /// Block until the lock is probably free.
    ///
    /// Returns `Ok(false)` when woken by unlock activity on this key and `Ok(true)`
    /// when the lock's remaining TTL ran out first. Either way the caller should
    /// retry [`DistributedMutex::try_lock`]. The caller's own cancellation or
    /// deadline comes back unwrapped as `LockbellError::Context`.
    pub async fn wait_until_unlocked(&mut self, ctx: &Context) -> Result<bool> {
        let remaining = self.store.remaining_ttl(ctx, &self.key).await?;
        if remaining.is_zero() {
            trace!(key = %self.key, "Mutex already unlocked");
            return Ok(true);
        }

        // No TTL bound when the deadline is not representable
        let ttl_deadline = Instant::now().checked_add(remaining);
        let bounded = match ttl_deadline {
            Some(deadline) => ctx.with_deadline(deadline),
            None => ctx.with_cancel(),
        };
        let channel = self.notification_channel();

        let (mut listener_task, confirmed) = ListenerTask::spawn(channel, bounded);

        // The task drops the sender without confirming when subscribing fails or panics
        if confirmed.await.is_err() {
            let joined = listener_task.join().await;
            return self.listener_outcome(ctx, joined);
        }

        debug!(
            key = %self.key,
            remaining_ms = remaining.as_millis() as u64,
            "Waiting for unlock"
        );

        let outcome = tokio::select! {
            biased;
            e = ctx.done() => Err(LockbellError::Context(e)),
            joined = listener_task.join() => self.listener_outcome(ctx, joined),
            _ = ttl_expiry(ttl_deadline) => Ok(true),
        };

        listener_task.shutdown().await;

        match &outcome {
            Ok(true) => debug!(key = %self.key, "Wait ended by TTL expiry"),
            Ok(false) => debug!(key = %self.key, "Wait ended by unlock notification"),
            Err(e) => debug!(key = %self.key, error = %e, "Wait aborted"),
        }
        outcome
    }

    /// Time left before the current lock record on this key expires; zero when unlocked
    pub async fn locked_until(&self, ctx: &Context) -> Result<Duration> {
        self.store.remaining_ttl(ctx, &self.key).await
    }

    /// Renew this handle's hold for another TTL.
    ///
    /// `Ok(false)` means the hold was already lost.
    pub async fn extend(&mut self, ctx: &Context) -> Result<bool> {
        let extended = self
            .store
            .extend(ctx, &self.key, &self.owner, self.ttl)
            .await?;

        if extended {
            self.state = MutexState::Held;
        } else {
            warn!(key = %self.key, owner = %self.owner, "Mutex hold lost before extension");
            self.state = MutexState::NotHeld;
        }
        Ok(extended)
    }

    /// Alternate `try_lock` and `wait_until_unlocked` until the lock is acquired.
    ///
    /// Any failure, including the end of `ctx`, comes back as `LockAcquisitionFailed`.
    pub async fn lock_or_wait(&mut self, ctx: &Context) -> Result<()> {
        loop {
            if self.try_lock(ctx).await? {
                return Ok(());
            }

            match self.wait_until_unlocked(ctx).await {
                Ok(ttl_expired) => {
                    trace!(key = %self.key, ttl_expired, "Retrying lock");
                }
                Err(e) => return Err(LockbellError::acquisition_failed(&self.key, e)),
            }
        }
    }

    /// The live notification handle, created if missing or closed
    fn notification_channel(&mut self) -> NotificationChannel {
        match &self.channel {
            Some(channel) if !channel.is_closed() => channel.clone(),
            _ => {
                let channel = NotificationChannel::for_key(self.bus.clone(), &self.key);
                self.channel = Some(channel.clone());
                channel
            }
        }
    }

    fn mark_not_held(&mut self) {
        if self.state != MutexState::Held {
            self.state = MutexState::NotHeld;
        }
    }

    fn listener_outcome(
        &self,
        ctx: &Context,
        joined: std::result::Result<Result<String>, JoinError>,
    ) -> Result<bool> {
        match joined {
            Ok(Ok(_)) | Ok(Err(LockbellError::ChannelClosed)) => Ok(false),
            Ok(Err(e)) => Self::bound_ended(ctx, e),
            Err(join_error) => {
                let message = describe_join_error(join_error);
                warn!(key = %self.key, error = %message, "Unlock listener failed");
                Err(LockbellError::transport(format!(
                    "unlock listener failed: {}",
                    message
                )))
            }
        }
    }

    /// Map an error from a wait bounded by `min(ctx deadline, TTL)`.
    ///
    /// The bound ending without the caller's context ending means the TTL ran out.
    fn bound_ended(ctx: &Context, err: LockbellError) -> Result<bool> {
        if err.context_error().is_none() {
            return Err(err);
        }
        match ctx.err() {
            Some(e) => Err(LockbellError::Context(e)),
            None => Ok(true),
        }
    }
}

/// Spawned listener whose task never outlives the wait that started it
struct ListenerTask {
    handle: JoinHandle<Result<String>>,
    finished: bool,
}

impl ListenerTask {
    /// Subscribe and listen on a spawned task.
    ///
    /// The receiver resolves once the subscription is confirmed; it errors if the
    /// task ended before that.
    fn spawn(channel: NotificationChannel, ctx: Context) -> (Self, oneshot::Receiver<()>) {
        let (confirmed_tx, confirmed_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut listener = channel.subscribe(&ctx).await?;
            let _ = confirmed_tx.send(());
            listener.recv(&ctx).await
        });
        let task = Self {
            handle,
            finished: false,
        };
        (task, confirmed_rx)
    }

    async fn join(&mut self) -> std::result::Result<Result<String>, JoinError> {
        let joined = (&mut self.handle).await;
        self.finished = true;
        joined
    }

    /// Abort the task and wait until its subscription has been dropped
    async fn shutdown(mut self) {
        if !self.finished {
            self.handle.abort();
            let _ = (&mut self.handle).await;
            self.finished = true;
        }
    }
}

impl Drop for ListenerTask {
    fn drop(&mut self) {
        if !self.finished {
            self.handle.abort();
        }
    }
}

async fn ttl_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        Err(err) => err.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
