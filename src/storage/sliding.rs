//! Sliding-window approximation over two adjacent fixed windows.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, SyncConfig};
use crate::counter::{CounterFilter, IncrementRequest};
use crate::error::Result;
use crate::storage::{BatchSyncStorage, CounterStorage, Counters, MemoryStorage, SyncReport};

/// Windows a bucket is retained for, so the previous one stays readable.
const RETENTION_WINDOWS: u32 = 2;

/// Blend a current-window count with the previous window's total.
///
/// The previous total is scaled by `previous_weight` and rounded half up.
///
/// ```
/// use skp_windowstore::storage::sliding_count;
///
/// assert_eq!(sliding_count(1, 10, 0.75), 9);
/// assert_eq!(sliding_count(3, 10, 0.25), 6);
/// ```
pub fn sliding_count(current_before: i64, previous_total: i64, previous_weight: f64) -> i64 {
    let weighted = (previous_total as f64 * previous_weight + 0.5).floor();
    current_before + weighted as i64
}

/// Sliding-window counter storage.
///
/// Each request is counted in its fixed window as usual, but the count
/// returned for it is the window's total before the request plus a linearly
/// decaying share of the previous window's total. This smooths the burst a
/// caller could otherwise fit across a window boundary.
///
/// Counters are batch-synchronized with the remote store. Queries read the
/// remote store; [`cached_counters`](Self::cached_counters) returns the raw
/// per-window totals held locally.
#[derive(Debug)]
pub struct SlidingWindowStorage<S> {
    inner: BatchSyncStorage<S>,
}

impl<S: CounterStorage> SlidingWindowStorage<S> {
    /// Create a sliding-window storage on the system clock.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(remote: S, config: SyncConfig) -> Result<Self> {
        Self::with_clock(remote, config, Arc::new(SystemClock))
    }

    /// Create a sliding-window storage whose cache expires on `clock`.
    pub fn with_clock(remote: S, config: SyncConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let cache = MemoryStorage::with_config(
            CacheConfig::default().with_retention_windows(RETENTION_WINDOWS),
        )
        .with_clock(clock);

        Ok(Self {
            inner: BatchSyncStorage::with_cache(remote, cache, config)?,
        })
    }

    pub fn cache(&self) -> &MemoryStorage {
        self.inner.cache()
    }

    pub fn remote(&self) -> &S {
        self.inner.remote()
    }

    /// Local per-window totals, including unsynchronized deltas.
    pub fn cached_counters(&self, filter: &CounterFilter) -> Counters {
        self.inner.cached_counters(filter)
    }

    /// Run a synchronization pass now.
    pub async fn sync_now(&self) -> SyncReport {
        self.inner.sync_now().await
    }

    fn count(&self, request: &IncrementRequest) -> i64 {
        let cache = self.inner.cache();
        let key = request.key();

        // The first window after the epoch has no predecessor.
        let previous_total = if request.previous_bucket_start() == request.bucket_start() {
            0
        } else {
            let previous_key = key.with_bucket_start(request.previous_bucket_start());
            cache.total_of(&previous_key, request.window()).unwrap_or(0)
        };

        let after = cache
            .apply_batch(std::slice::from_ref(request))
            .get(&key)
            .copied()
            .unwrap_or(request.cost());

        sliding_count(after - request.cost(), previous_total, request.previous_weight())
    }
}

impl<S: CounterStorage> CounterStorage for SlidingWindowStorage<S> {
    /// Returns the blended count for each request's key.
    ///
    /// The request's own cost is recorded but not included in its returned count.
    async fn add_and_get(&self, requests: &[IncrementRequest]) -> Result<Counters> {
        Ok(requests
            .iter()
            .map(|request| (request.key(), self.count(request)))
            .collect())
    }

    async fn current_counters(&self, filter: &CounterFilter) -> Result<Counters> {
        self.inner.current_counters(filter).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
