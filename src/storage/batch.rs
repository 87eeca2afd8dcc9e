//! Periodic batched reconciliation with a remote counter store.
//!
//! Callers only touch the local cache. On every tick the synchronizer sends
//! each distributed counter's accumulated delta to the remote store as one
//! request and adopts the remote total, so remote traffic per period scales
//! with the number of distinct counters, not with call volume.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::counter::{CounterFilter, CounterKey, IncrementRequest};
use crate::error::Result;
use crate::storage::schedule::{PeriodicHandle, spawn_periodic};
use crate::storage::{CounterStorage, Counters, MemoryStorage};

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Counters reconciled with the remote store.
    pub synced: usize,
    /// Counters whose remote call failed; they are retried on the next pass.
    pub failed: usize,
    /// The pass did not run because another one was still in progress.
    pub skipped: bool,
}

/// One reconciliation pass between a cache and a remote store.
pub struct CacheSynchronizer<S> {
    cache: Arc<MemoryStorage>,
    remote: Arc<S>,
    running: tokio::sync::Mutex<()>,
}

impl<S> std::fmt::Debug for CacheSynchronizer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSynchronizer")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<S: CounterStorage> CacheSynchronizer<S> {
    pub fn new(cache: Arc<MemoryStorage>, remote: Arc<S>) -> Self {
        Self {
            cache,
            remote,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Reconcile every live distributed counter once.
    ///
    /// A failure on one counter is logged and does not stop the others. If a
    /// pass is already running this returns immediately with `skipped` set.
    pub async fn run_once(&self) -> SyncReport {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Previous synchronization still running, skipping tick");
            return SyncReport {
                skipped: true,
                ..Default::default()
            };
        };

        let pending = self.collect_pending();
        debug!(counters = pending.len(), "Synchronizing storage cache");

        let mut report = SyncReport::default();
        for entry in pending {
            match self.sync_counter(&entry).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Exception during synchronization, ignoring");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Distributed counters whose window is still open.
    ///
    /// Buckets retained past their window (see `CacheConfig::retention_windows`)
    /// are frozen: they keep their local total and are no longer sent.
    fn collect_pending(&self) -> Vec<PendingSync> {
        let now = self.cache.now_ms();
        let retention = u64::from(self.cache.retention_windows());

        let mut pending = Vec::new();
        self.cache.for_each_bucket(|expires_at, bucket| {
            for (key, value) in bucket.iter().filter(|(_, value)| value.distributed) {
                let window_ms = expires_at.saturating_sub(key.bucket_start()) / retention;
                let window_end = key.bucket_start().saturating_add(window_ms);
                if now > window_end {
                    continue;
                }
                pending.push(PendingSync {
                    expires_at,
                    key: key.clone(),
                    cost: value.delta,
                    window: Duration::from_millis(window_ms),
                    remaining: Duration::from_millis(window_end - now),
                });
            }
        });
        pending
    }

    async fn sync_counter(&self, entry: &PendingSync) -> Result<()> {
        let request =
            IncrementRequest::for_bucket(&entry.key, entry.window, entry.remaining, entry.cost);

        let remote_total = self.remote.add_one(request).await?;

        if !self
            .cache
            .reconcile(entry.expires_at, &entry.key, entry.cost, remote_total)
        {
            debug!(key = %entry.key, "Counter expired during synchronization");
        }
        Ok(())
    }
}

struct PendingSync {
    expires_at: u64,
    key: CounterKey,
    cost: i64,
    window: Duration,
    remaining: Duration,
}

/// Timer that runs a [`CacheSynchronizer`] every period.
///
/// Ticks never overlap. Stopping lets a tick in progress finish.
#[derive(Debug)]
pub struct PeriodicSynchronizer {
    handle: PeriodicHandle,
    period: Duration,
}

impl PeriodicSynchronizer {
    /// Start ticking. Must be called from within a tokio runtime.
    pub fn start<S: CounterStorage>(
        synchronizer: Arc<CacheSynchronizer<S>>,
        period: Duration,
    ) -> Self {
        let handle = spawn_periodic(period, move || {
            let synchronizer = synchronizer.clone();
            async move {
                let report = synchronizer.run_once().await;
                if report.failed > 0 {
                    warn!(
                        synced = report.synced,
                        failed = report.failed,
                        "Synchronization tick finished with failures"
                    );
                }
            }
        });

        Self { handle, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stop the timer and wait for a tick in progress to finish.
    pub async fn stop(&self) {
        self.handle.stop().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Local cache reconciled with a remote store on a fixed period.
///
/// `add_and_get` answers from the local cache only. Queries go to the remote
/// store, which lags local traffic by up to one period.
///
/// # Example
///
/// ```ignore
/// use skp_windowstore::{BatchSyncStorage, CounterStorage, MemoryStorage, SyncConfig};
/// use std::time::Duration;
///
/// let remote = MemoryStorage::new();
/// let storage = BatchSyncStorage::new(remote, SyncConfig::every(Duration::from_millis(500)))?;
/// let total = storage.add_one(request).await?;
/// storage.close().await?;
/// ```
pub struct BatchSyncStorage<S> {
    cache: Arc<MemoryStorage>,
    remote: Arc<S>,
    synchronizer: Arc<CacheSynchronizer<S>>,
    timer: PeriodicSynchronizer,
    closed: AtomicBool,
}

impl<S> std::fmt::Debug for BatchSyncStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSyncStorage")
            .field("cache", &self.cache)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

impl<S: CounterStorage> BatchSyncStorage<S> {
    /// Wrap `remote` with a fresh cache on the system clock.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(remote: S, config: SyncConfig) -> Result<Self> {
        Self::with_cache(remote, MemoryStorage::new(), config)
    }

    /// Wrap `remote` with a caller-built cache.
    pub fn with_cache(remote: S, cache: MemoryStorage, config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(cache);
        let remote = Arc::new(remote);
        let synchronizer = Arc::new(CacheSynchronizer::new(cache.clone(), remote.clone()));
        let timer = PeriodicSynchronizer::start(synchronizer.clone(), config.period);

        Ok(Self {
            cache,
            remote,
            synchronizer,
            timer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn cache(&self) -> &MemoryStorage {
        &self.cache
    }

    pub fn remote(&self) -> &S {
        &self.remote
    }

    /// Run a synchronization pass now instead of waiting for the next tick.
    pub async fn sync_now(&self) -> SyncReport {
        self.synchronizer.run_once().await
    }

    /// Local view of the counters, including unsynchronized deltas.
    pub fn cached_counters(&self, filter: &CounterFilter) -> Counters {
        self.cache.counters(filter)
    }
}

impl<S: CounterStorage> CounterStorage for BatchSyncStorage<S> {
    async fn add_and_get(&self, requests: &[IncrementRequest]) -> Result<Counters> {
        Ok(self.cache.apply_batch(requests))
    }

    async fn current_counters(&self, filter: &CounterFilter) -> Result<Counters> {
        self.remote.current_counters(filter).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.timer.stop().await;
        info!("Batch synchronization stopped");
        self.remote.close().await
    }
}
