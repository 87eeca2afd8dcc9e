//! In-memory bucketed counter cache.
//!
//! Counters are grouped into buckets keyed by their expiry instant. A bucket is
//! dropped whole once the clock passes its expiry; that sweep runs at the end
//! of every mutating call and before every read. There is no capacity bound and
//! no recency-based eviction.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::counter::{
    CounterFilter, CounterKey, CounterValue, IncrementRequest, Override, window_ms,
};
use crate::error::Result;
use crate::storage::{CounterStorage, Counters};

/// Counters sharing one expiry instant.
pub type Bucket = HashMap<CounterKey, CounterValue>;

/// In-memory bucketed counter cache.
///
/// Uses `DashMap` so writers to buckets in different shards never contend.
/// Each bucket is mutated under its shard lock, which keeps the sequence of
/// applies to any one key linearizable.
///
/// # Example
///
/// ```
/// use skp_windowstore::{IncrementRequest, MemoryStorage};
/// use skp_windowstore::clock::ManualClock;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::new(10_000));
/// let cache = MemoryStorage::new().with_clock(clock.clone());
///
/// let request = IncrementRequest::new("api", "per_user", "alice", Duration::from_secs(1), 10_000)
///     .with_cost(3);
/// let totals = cache.apply_batch(&[request.clone()]);
/// assert_eq!(totals[&request.key()], 3);
///
/// // The bucket [10s, 11s) is gone once the clock passes 11s
/// clock.set(11_001);
/// assert!(cache.debug_counters().is_empty());
/// ```
pub struct MemoryStorage {
    buckets: DashMap<u64, Bucket>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("buckets", &self.buckets.len())
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a cache on the system clock with buckets retained for one window.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with custom retention.
    ///
    /// A retention of zero windows is treated as one.
    pub fn with_config(config: CacheConfig) -> Self {
        let config = CacheConfig {
            retention_windows: config.retention_windows.max(1),
        };
        Self {
            buckets: DashMap::new(),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How many window lengths a bucket outlives its start.
    pub fn retention_windows(&self) -> u32 {
        self.config.retention_windows
    }

    /// Current time according to this cache's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Apply each request's cost and collect the resulting totals.
    pub fn apply_batch(&self, requests: &[IncrementRequest]) -> Counters {
        let mut totals = HashMap::with_capacity(requests.len());

        for request in requests {
            let expires_at = request.expires_at(self.config.retention_windows);
            let key = request.key();

            let total = {
                let mut bucket = self.buckets.entry(expires_at).or_default();
                let value = bucket.entry(key.clone()).or_default();
                value.distributed |= request.is_distributed();
                value.apply(request.cost())
            };
            totals.insert(key, total);
        }

        self.run_sweep();
        totals
    }

    /// Force each override's total, creating buckets and keys as needed.
    ///
    /// A settling override keeps local increments it did not account for on
    /// top of the new total; a plain one clears the delta.
    pub fn override_keys(&self, overrides: &[Override]) {
        for o in overrides {
            let expires_at = expiry_of(&o.key, o.window, self.config.retention_windows);
            let mut bucket = self.buckets.entry(expires_at).or_default();
            match bucket.entry(o.key.clone()) {
                Entry::Occupied(mut entry) => {
                    let value = entry.get_mut();
                    match o.settled {
                        Some(sent) => value.reconcile(sent, o.new_total),
                        None => {
                            value.override_total(o.new_total);
                            value.delta = 0;
                        }
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(CounterValue {
                        total: o.new_total,
                        delta: 0,
                        distributed: true,
                    });
                }
            }
        }

        self.run_sweep();
    }

    /// Snapshot of live counters matching `filter`.
    ///
    /// A key is expected to be used with a single window length. If the same
    /// key was applied with several, the bucket expiring last wins.
    pub fn counters(&self, filter: &CounterFilter) -> Counters {
        self.run_sweep();

        let mut latest: HashMap<CounterKey, (u64, i64)> = HashMap::new();
        for bucket in self.buckets.iter() {
            let expires_at = *bucket.key();
            for (key, value) in bucket.value().iter().filter(|(key, _)| filter.matches(key)) {
                match latest.entry(key.clone()) {
                    Entry::Occupied(mut entry) => {
                        if expires_at > entry.get().0 {
                            entry.insert((expires_at, value.total));
                        }
                    }
                    Entry::Vacant(entry) => {
                        entry.insert((expires_at, value.total));
                    }
                }
            }
        }

        latest
            .into_iter()
            .map(|(key, (_, total))| (key, total))
            .collect()
    }

    /// Every live counter.
    pub fn debug_counters(&self) -> Counters {
        self.counters(&CounterFilter::All)
    }

    /// Visit every live bucket with write access, keyed by its expiry instant.
    ///
    /// `action` runs under the bucket's shard lock and must not call back into
    /// this cache.
    pub fn for_each_bucket<F>(&self, mut action: F)
    where
        F: FnMut(u64, &mut Bucket),
    {
        self.run_sweep();
        for mut bucket in self.buckets.iter_mut() {
            let expires_at = *bucket.key();
            action(expires_at, bucket.value_mut());
        }
        self.run_sweep();
    }

    /// Settle `sent` units of a counter's delta against the remote's `remote_total`.
    ///
    /// Returns `false` when the counter expired while the remote call was in flight.
    pub fn reconcile(
        &self,
        expires_at: u64,
        key: &CounterKey,
        sent: i64,
        remote_total: i64,
    ) -> bool {
        let settled = match self.buckets.get_mut(&expires_at) {
            Some(mut bucket) => {
                let value = bucket.get_mut(key);
                match value {
                    Some(value) => {
                        value.reconcile(sent, remote_total);
                        true
                    }
                    None => false,
                }
            }
            None => false,
        };

        self.run_sweep();
        settled
    }

    /// Total of a live counter in a bucket of the given window length, without mutating it.
    pub fn total_of(&self, key: &CounterKey, window: Duration) -> Option<i64> {
        let expires_at = expiry_of(key, window, self.config.retention_windows);
        if self.now_ms() > expires_at {
            return None;
        }
        self.buckets
            .get(&expires_at)
            .and_then(|bucket| bucket.get(key).map(|value| value.total))
    }

    /// Drop every bucket whose expiry instant has passed.
    pub fn run_sweep(&self) {
        let now = self.now_ms();
        self.buckets.retain(|&expires_at, _| expires_at >= now);
    }

    /// Number of counters currently held, expired or not.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.value().len()).sum()
    }

    /// Check if the cache holds no counters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of buckets currently held.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Clear all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

fn expiry_of(key: &CounterKey, window: Duration, retention_windows: u32) -> u64 {
    key.bucket_start()
        .saturating_add(window_ms(window).saturating_mul(u64::from(retention_windows)))
}

impl CounterStorage for MemoryStorage {
    async fn add_and_get(&self, requests: &[IncrementRequest]) -> Result<Counters> {
        Ok(self.apply_batch(requests))
    }

    async fn current_counters(&self, filter: &CounterFilter) -> Result<Counters> {
        Ok(self.counters(filter))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
