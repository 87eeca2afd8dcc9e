//! Windowed counter storage for rate limiting.
//!
//! `skp_windowstore` tracks, per counter key and fixed time window, how many
//! cost units have been consumed, and trades consistency for latency against
//! a remote authoritative counter store:
//!
//! - **Bucketed cache**: concurrent in-memory counters, evicted when their window expires
//! - **Write-through**: answer locally, forward every batch to the remote store on one FIFO worker
//! - **Batch sync**: answer locally, reconcile per-key deltas with the remote store every period
//! - **Sliding window**: blend the previous window's total into the current count
//! - **Redis**: a remote counter store over a pooled connection (`redis` feature)
//!
//! # Quick Start
//!
//! ```ignore
//! use skp_windowstore::{BatchSyncStorage, CounterStorage, IncrementRequest, MemoryStorage, SyncConfig};
//! use skp_windowstore::clock::current_timestamp_ms;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> skp_windowstore::Result<()> {
//!     // Any CounterStorage can act as the remote store
//!     let remote = MemoryStorage::new();
//!     let storage = BatchSyncStorage::new(remote, SyncConfig::every(Duration::from_millis(500)))?;
//!
//!     let request = IncrementRequest::new("api", "per_user", "user:123", Duration::from_secs(60), current_timestamp_ms());
//!     let used = storage.add_one(request).await?;
//!     println!("{used} used this minute");
//!
//!     storage.close().await
//! }
//! ```
//!
//! # Strategies
//!
//! | Storage | Caller latency | Remote writes | Remote errors |
//! |---------|----------------|---------------|---------------|
//! | remote store used directly | network round trip | one per request | returned to caller |
//! | `WriteThroughStorage` | local | one per batch | logged |
//! | `BatchSyncStorage` | local | one per key per period | logged |
//! | `SlidingWindowStorage` | local | one per key per period | logged |
//!
//! # Feature Flags
//!
//! - `redis`: Redis remote counter store

pub mod clock;
pub mod config;
pub mod counter;
pub mod error;
pub mod storage;

// Re-export main types
pub use config::{CacheConfig, SyncConfig};
pub use counter::{CounterFilter, CounterKey, CounterValue, IncrementRequest, Override};
pub use error::{ConfigError, ConnectionError, Result, StorageError, WindowStoreError};
pub use storage::{
    BatchSyncStorage, CounterStorage, Counters, MemoryStorage, SlidingWindowStorage,
    WriteThroughStorage,
};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisCounterStore};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{CacheConfig, SyncConfig};
    pub use crate::counter::{CounterFilter, CounterKey, IncrementRequest};
    pub use crate::error::{Result, WindowStoreError};
    pub use crate::storage::{
        BatchSyncStorage, CounterStorage, MemoryStorage, SlidingWindowStorage, WriteThroughStorage,
    };

    #[cfg(feature = "redis")]
    pub use crate::storage::{RedisConfig, RedisCounterStore};
}
