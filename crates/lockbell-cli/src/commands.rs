//! Demo commands run against the in-memory store and bus

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use lockbell_bus::MemoryBus;
use lockbell_common::Context;
use lockbell_mutex::{LockClient, LockConfig, LockStats, MemoryLockStore};

use crate::settings::{ContendArgs, WaitArgs};

/// Store and bus shared by every simulated process
pub struct Cluster {
    pub client: LockClient,
    pub store: Arc<MemoryLockStore>,
    pub bus: MemoryBus,
}

impl Cluster {
    pub fn new(config: LockConfig) -> Self {
        let mut store = MemoryLockStore::new().with_retry_policy(config.retry_policy());
        if let Some(interval) = config.sweep_interval() {
            store = store.with_expiry_sweeper(interval);
        }
        let store = Arc::new(store);
        let bus = MemoryBus::with_capacity(config.bus_capacity);
        let client = LockClient::new(store.clone(), Arc::new(bus.clone()), config);

        Self { client, store, bus }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContendReport {
    pub key: String,
    pub workers: usize,
    pub rounds: usize,
    pub acquisitions: usize,
    /// Times more than one worker was inside the critical section
    pub violations: usize,
    pub elapsed_ms: u64,
    pub stats: LockStats,
}

/// Workers alternate `lock_or_wait`, a critical section, and `unlock`.
pub async fn contend(
    cluster: &Cluster,
    args: &ContendArgs,
    ctx: &Context,
) -> anyhow::Result<ContendReport> {
    let started = Instant::now();
    let active = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let acquisitions = Arc::new(AtomicUsize::new(0));
    let hold = Duration::from_millis(args.hold_ms);

    info!(
        key = %args.key,
        workers = args.workers,
        rounds = args.rounds,
        "Starting contention run"
    );

    let mut handles = Vec::with_capacity(args.workers);
    for worker in 0..args.workers {
        let mut mutex = cluster.client.new_mutex(args.key.clone());
        let ctx = ctx.clone();
        let active = active.clone();
        let violations = violations.clone();
        let acquisitions = acquisitions.clone();
        let rounds = args.rounds;

        handles.push(tokio::spawn(async move {
            for round in 0..rounds {
                mutex.lock_or_wait(&ctx).await?;

                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    violations.fetch_add(1, Ordering::SeqCst);
                    warn!(worker, round, "Mutual exclusion violated");
                }
                acquisitions.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(hold).await;
                active.fetch_sub(1, Ordering::SeqCst);

                mutex.unlock(&ctx).await?;
            }
            Ok::<_, lockbell_common::LockbellError>(())
        }));
    }

    for handle in handles {
        handle.await??;
    }

    let report = ContendReport {
        key: args.key.clone(),
        workers: args.workers,
        rounds: args.rounds,
        acquisitions: acquisitions.load(Ordering::SeqCst),
        violations: violations.load(Ordering::SeqCst),
        elapsed_ms: started.elapsed().as_millis() as u64,
        stats: cluster.store.stats(),
    };

    if report.violations > 0 {
        anyhow::bail!("{} mutual exclusion violations on '{}'", report.violations, args.key);
    }
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    Notification,
    TtlExpiry,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitReport {
    pub key: String,
    pub woken_by: WakeReason,
    pub waited_ms: u64,
    /// Whether the waiter took the lock after waking
    pub acquired: bool,
}

/// One holder, one waiter. The holder either unlocks after `hold_ms` or
/// disappears without unlocking.
pub async fn wait(cluster: &Cluster, args: &WaitArgs, ctx: &Context) -> anyhow::Result<WaitReport> {
    let mut holder = cluster.client.new_mutex(args.key.clone());
    let mut waiter = cluster.client.new_mutex(args.key.clone());

    if !holder.try_lock(ctx).await? {
        anyhow::bail!("lock '{}' is already held", args.key);
    }
    info!(key = %args.key, ttl_ms = holder.ttl().as_millis() as u64, "Holder acquired lock");

    let waiting = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let expired = waiter.wait_until_unlocked(&ctx).await?;
            let waited = started.elapsed();
            let acquired = waiter.try_lock(&ctx).await?;
            if acquired {
                waiter.unlock(&ctx).await?;
            }
            Ok::<_, lockbell_common::LockbellError>((expired, waited, acquired))
        })
    };

    if args.crash {
        info!(key = %args.key, "Holder crashed without unlocking");
        drop(holder);
    } else {
        ctx.run(tokio::time::sleep(Duration::from_millis(args.hold_ms)))
            .await?;
        holder.unlock(ctx).await?;
        info!(key = %args.key, "Holder unlocked");
    }

    let (expired, waited, acquired) = waiting.await??;
    Ok(WaitReport {
        key: args.key.clone(),
        woken_by: if expired {
            WakeReason::TtlExpiry
        } else {
            WakeReason::Notification
        },
        waited_ms: waited.as_millis() as u64,
        acquired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(ttl: Duration) -> Cluster {
        Cluster::new(LockConfig {
            sweep_interval_ms: 0,
            ..LockConfig::default().with_ttl(ttl)
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_contend_reports_no_violations() {
        let cluster = cluster(Duration::from_secs(2));
        let args = ContendArgs {
            workers: 4,
            rounds: 5,
            key: "contended".to_string(),
            hold_ms: 1,
        };

        let report = contend(&cluster, &args, &Context::background()).await.unwrap();
        assert_eq!(report.acquisitions, 20);
        assert_eq!(report.violations, 0);
        assert_eq!(report.stats.total_releases, 20);
        assert_eq!(report.stats.active_locks, 0);
        assert_eq!(cluster.bus.subscriber_count("lock-notify:contended"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_woken_by_notification() {
        let cluster = cluster(Duration::from_secs(10));
        let args = WaitArgs {
            key: "k".to_string(),
            hold_ms: 2000,
            crash: false,
        };

        let report = wait(&cluster, &args, &Context::background()).await.unwrap();
        assert_eq!(report.woken_by, WakeReason::Notification);
        assert!(report.waited_ms >= 2000 && report.waited_ms < 2200);
        assert!(report.acquired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_falls_back_to_ttl_on_crash() {
        let cluster = cluster(Duration::from_secs(3));
        let args = WaitArgs {
            key: "k".to_string(),
            hold_ms: 0,
            crash: true,
        };

        let report = wait(&cluster, &args, &Context::background()).await.unwrap();
        assert_eq!(report.woken_by, WakeReason::TtlExpiry);
        assert!(report.waited_ms >= 3000);
        assert!(report.acquired);
    }

    #[test]
    fn test_wait_report_json() {
        let report = WaitReport {
            key: "k".to_string(),
            woken_by: WakeReason::TtlExpiry,
            waited_ms: 12,
            acquired: true,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["woken_by"], "ttl_expiry");
        assert_eq!(json["waited_ms"], 12);
    }
}
