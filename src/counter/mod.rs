//! Counter identity, values and requests.
//!
//! These are plain value types with no side effects. All shared mutation goes
//! through [`MemoryStorage`](crate::storage::MemoryStorage).

mod key;
mod request;

pub use key::{CounterKey, bucket_start, previous_bucket_start};
pub(crate) use key::window_ms;
pub use request::IncrementRequest;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Locally held state of one counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterValue {
    /// Best known total for the key.
    pub total: i64,
    /// Net local change since the last reconciliation with the remote store.
    pub delta: i64,
    /// Whether any request that touched this counter must reach the remote store.
    pub distributed: bool,
}

impl CounterValue {
    /// Add `cost` and return the new total.
    pub fn apply(&mut self, cost: i64) -> i64 {
        self.total += cost;
        self.delta += cost;
        self.total
    }

    /// Replace the total. `delta` is left for the caller to settle.
    pub fn override_total(&mut self, total: i64) {
        self.total = total;
    }

    /// Settle `sent` units of delta that the remote store acknowledged with `remote_total`.
    ///
    /// Increments applied after `sent` was read stay in `delta` and on top of
    /// the remote total, so they are neither lost nor counted twice.
    pub fn reconcile(&mut self, sent: i64, remote_total: i64) {
        self.delta -= sent;
        self.total = remote_total + self.delta;
    }
}

/// Authoritative replacement of one counter's total, issued by synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    /// The counter to replace.
    pub key: CounterKey,
    /// Window length of the counter's bucket, used to locate its expiry.
    pub window: Duration,
    /// The new total.
    pub new_total: i64,
    /// Local cost the remote store acknowledged with `new_total`.
    ///
    /// `None` replaces the counter outright and clears its delta.
    pub settled: Option<i64>,
}

impl Override {
    pub fn new(key: CounterKey, window: Duration, new_total: i64) -> Self {
        Self {
            key,
            window,
            new_total,
            settled: None,
        }
    }

    /// Settle only `sent` units of local delta, keeping later increments.
    pub fn with_settled(mut self, sent: i64) -> Self {
        self.settled = Some(sent);
        self
    }

    /// Override the counter `request` increments.
    pub fn for_request(request: &IncrementRequest, new_total: i64) -> Self {
        Self::new(request.key(), request.window(), new_total)
    }
}

/// Which counters a query returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CounterFilter {
    /// Every live counter.
    #[default]
    All,
    /// Counters of one resource.
    Resource(String),
    /// Counters of one limit on a resource.
    ResourceAndLimit(String, String),
    /// Counters of one property of a limit on a resource.
    ResourceLimitAndProperty(String, String, String),
}

impl CounterFilter {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self::Resource(resource.into())
    }

    pub fn resource_and_limit(resource: impl Into<String>, limit_name: impl Into<String>) -> Self {
        Self::ResourceAndLimit(resource.into(), limit_name.into())
    }

    pub fn resource_limit_and_property(
        resource: impl Into<String>,
        limit_name: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self::ResourceLimitAndProperty(resource.into(), limit_name.into(), property.into())
    }

    /// Whether `key` passes this filter.
    pub fn matches(&self, key: &CounterKey) -> bool {
        match self {
            Self::All => true,
            Self::Resource(r) => key.resource() == r,
            Self::ResourceAndLimit(r, l) => key.resource() == r && key.limit_name() == l,
            Self::ResourceLimitAndProperty(r, l, p) => {
                key.resource() == r && key.limit_name() == l && key.property() == p
            }
        }
    }
}
