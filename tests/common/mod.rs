//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use skp_windowstore::{
    CounterFilter, CounterStorage, Counters, IncrementRequest, MemoryStorage, Result, StorageError,
};

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(3600);

/// A request in the current hour, so nothing expires mid-test.
pub fn request(property: &str, cost: i64) -> IncrementRequest {
    let now = skp_windowstore::clock::current_timestamp_ms();
    IncrementRequest::new("api", "per_user", property, HOUR, now).with_cost(cost)
}

/// Remote store over a [`MemoryStorage`] that can be told to fail or stall.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStorage,
    failing: AtomicBool,
    failing_property: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    closes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every batch containing a request for `property`.
    pub fn failing_on(property: &str) -> Self {
        Self {
            failing_property: Some(property.to_string()),
            ..Self::default()
        }
    }

    /// Sleep before answering each batch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn totals(&self) -> Counters {
        self.inner.debug_counters()
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

impl CounterStorage for FlakyStore {
    async fn add_and_get(&self, requests: &[IncrementRequest]) -> Result<Counters> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let poisoned = self
            .failing_property
            .as_deref()
            .is_some_and(|p| requests.iter().any(|r| r.property() == p));
        if self.failing.load(Ordering::SeqCst) || poisoned {
            return Err(StorageError::operation_failed("remote unavailable", true).into());
        }
        self.inner.add_and_get(requests).await
    }

    async fn current_counters(&self, filter: &CounterFilter) -> Result<Counters> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::operation_failed("remote unavailable", true).into());
        }
        self.inner.current_counters(filter).await
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
