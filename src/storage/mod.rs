//! Storage capability trait and implementations.
//!
//! Every strategy implements [`CounterStorage`]. The same trait is the contract
//! for the remote counter store that the synchronizing strategies wrap, so any
//! storage can stand in as a remote:
//!
//! - [`MemoryStorage`]: the local bucketed counter cache
//! - [`WriteThroughStorage`]: local cache plus a single FIFO worker forwarding every batch
//! - [`BatchSyncStorage`]: local cache plus a periodic per-key delta reconciliation
//! - [`SlidingWindowStorage`]: two-bucket sliding approximation over a batch-synced cache
//! - `RedisCounterStore` (`redis` feature): a remote store backed by Redis
//!
//! Using a remote store directly is the fully synchronous strategy: every call
//! pays the network round trip and its errors reach the caller.

mod batch;
mod memory;
mod schedule;
mod sliding;
mod write_through;
#[cfg(feature = "redis")]
mod redis;

pub use batch::{BatchSyncStorage, CacheSynchronizer, PeriodicSynchronizer, SyncReport};
pub use memory::{Bucket, MemoryStorage};
pub use schedule::{PeriodicHandle, spawn_periodic};
pub use sliding::{SlidingWindowStorage, sliding_count};
pub use write_through::WriteThroughStorage;

#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisCounterStore};

use std::collections::HashMap;
use std::future::Future;

use crate::counter::{CounterFilter, CounterKey, IncrementRequest};
use crate::error::{Result, StorageError};

/// Totals keyed by counter.
pub type Counters = HashMap<CounterKey, i64>;

/// Windowed counter storage.
///
/// Implementations must be thread-safe (`Send + Sync`). All operations are
/// async so local and networked backends share one interface.
///
/// # Example
///
/// ```ignore
/// use skp_windowstore::{CounterStorage, IncrementRequest, MemoryStorage};
/// use std::time::Duration;
///
/// async fn example<S: CounterStorage>(storage: &S, now_ms: u64) -> skp_windowstore::Result<()> {
///     let request = IncrementRequest::new("api", "per_user", "alice", Duration::from_secs(60), now_ms);
///     let total = storage.add_one(request).await?;
///     println!("alice used {total} this minute");
///     Ok(())
/// }
/// ```
pub trait CounterStorage: Send + Sync + 'static {
    /// Apply every request's cost and return the resulting totals.
    ///
    /// When a batch touches the same key more than once, the returned total
    /// is the one reached after the last request for that key.
    fn add_and_get(
        &self,
        requests: &[IncrementRequest],
    ) -> impl Future<Output = Result<Counters>> + Send;

    /// Snapshot of the live counters matching `filter`.
    fn current_counters(
        &self,
        filter: &CounterFilter,
    ) -> impl Future<Output = Result<Counters>> + Send;

    /// Release held resources (workers, timers, connections).
    ///
    /// Calling `close` more than once is a no-op.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    /// Apply a single request and return its counter's total.
    fn add_one(&self, request: IncrementRequest) -> impl Future<Output = Result<i64>> + Send {
        async move {
            let key = request.key();
            let totals = self.add_and_get(std::slice::from_ref(&request)).await?;
            totals
                .get(&key)
                .copied()
                .ok_or_else(|| StorageError::KeyNotFound(key.to_string()).into())
        }
    }

    /// Every live counter.
    fn query_all(&self) -> impl Future<Output = Result<Counters>> + Send {
        async move { self.current_counters(&CounterFilter::All).await }
    }

    /// Live counters of one resource.
    fn query_by_resource(&self, resource: &str) -> impl Future<Output = Result<Counters>> + Send {
        async move {
            self.current_counters(&CounterFilter::resource(resource))
                .await
        }
    }

    /// Live counters of one limit on a resource.
    fn query_by_resource_and_limit(
        &self,
        resource: &str,
        limit_name: &str,
    ) -> impl Future<Output = Result<Counters>> + Send {
        async move {
            self.current_counters(&CounterFilter::resource_and_limit(resource, limit_name))
                .await
        }
    }

    /// Live counters of one property of a limit on a resource.
    fn query_by_resource_and_limit_and_property(
        &self,
        resource: &str,
        limit_name: &str,
        property: &str,
    ) -> impl Future<Output = Result<Counters>> + Send {
        async move {
            let filter = CounterFilter::resource_limit_and_property(resource, limit_name, property);
            self.current_counters(&filter).await
        }
    }
}

impl<S: CounterStorage + ?Sized> CounterStorage for std::sync::Arc<S> {
    async fn add_and_get(&self, requests: &[IncrementRequest]) -> Result<Counters> {
        (**self).add_and_get(requests).await
    }

    async fn current_counters(&self, filter: &CounterFilter) -> Result<Counters> {
        (**self).current_counters(filter).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

impl<S: CounterStorage + ?Sized> CounterStorage for Box<S> {
    async fn add_and_get(&self, requests: &[IncrementRequest]) -> Result<Counters> {
        (**self).add_and_get(requests).await
    }

    async fn current_counters(&self, filter: &CounterFilter) -> Result<Counters> {
        (**self).current_counters(filter).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
