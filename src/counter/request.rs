//! Increment requests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::counter::key::{bucket_start, window_ms};
use crate::counter::CounterKey;
use crate::error::{ConfigError, Result};

/// A request to add `cost` to one counter and read back its total.
///
/// The bucket is derived from `event_timestamp` and `window` at construction.
///
/// # Example
///
/// ```
/// use skp_windowstore::IncrementRequest;
/// use std::time::Duration;
///
/// let request = IncrementRequest::new("api", "per_user", "alice", Duration::from_secs(60), 90_000)
///     .with_cost(3)
///     .with_limit(100);
///
/// assert_eq!(request.bucket_start(), 60_000);
/// assert_eq!(request.previous_bucket_start(), 0);
/// assert!((request.previous_weight() - 0.5).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementRequest {
    resource: String,
    limit_name: String,
    property: String,
    distributed: bool,
    window: Duration,
    event_timestamp: u64,
    cost: i64,
    limit: i64,
    bucket_start: u64,
    ttl: Option<Duration>,
}

impl IncrementRequest {
    /// Create a distributed request of cost 1.
    ///
    /// # Panics
    ///
    /// Panics if `window` is zero. Use [`IncrementRequest::try_new`] to get an error instead.
    pub fn new(
        resource: impl Into<String>,
        limit_name: impl Into<String>,
        property: impl Into<String>,
        window: Duration,
        event_timestamp: u64,
    ) -> Self {
        assert!(!window.is_zero(), "window must be non-zero");

        Self {
            resource: resource.into(),
            limit_name: limit_name.into(),
            property: property.into(),
            distributed: true,
            window,
            event_timestamp,
            cost: 1,
            limit: 0,
            bucket_start: bucket_start(event_timestamp, window),
            ttl: None,
        }
    }

    /// Try to create a request, returning an error if the window is zero.
    pub fn try_new(
        resource: impl Into<String>,
        limit_name: impl Into<String>,
        property: impl Into<String>,
        window: Duration,
        event_timestamp: u64,
    ) -> Result<Self> {
        if window.is_zero() {
            return Err(ConfigError::InvalidWindow("window must be non-zero".into()).into());
        }
        Ok(Self::new(resource, limit_name, property, window, event_timestamp))
    }

    /// Rebuild a request against an existing bucket with an explicit TTL.
    ///
    /// Used by synchronization to forward accumulated cost with only the
    /// unexpired remainder of the bucket as the remote TTL.
    pub fn for_bucket(key: &CounterKey, window: Duration, ttl: Duration, cost: i64) -> Self {
        let window = window.max(Duration::from_millis(1));
        Self {
            resource: key.resource().to_string(),
            limit_name: key.limit_name().to_string(),
            property: key.property().to_string(),
            distributed: true,
            window,
            event_timestamp: key.bucket_start(),
            cost,
            limit: 0,
            bucket_start: key.bucket_start(),
            ttl: Some(ttl.max(Duration::from_millis(1))),
        }
    }

    /// Set the cost added by this request.
    pub fn with_cost(mut self, cost: i64) -> Self {
        self.cost = cost;
        self
    }

    /// Set the limit this request is evaluated against.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Mark whether the request must eventually reach the remote store.
    pub fn with_distributed(mut self, distributed: bool) -> Self {
        self.distributed = distributed;
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn limit_name(&self) -> &str {
        &self.limit_name
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Time to live a remote store should give the counter if it creates it.
    ///
    /// Defaults to what is left of the window at `event_timestamp`.
    pub fn ttl(&self) -> Duration {
        self.ttl.unwrap_or_else(|| {
            let end = self.bucket_start.saturating_add(window_ms(self.window));
            Duration::from_millis(end.saturating_sub(self.event_timestamp).max(1))
        })
    }

    pub fn event_timestamp(&self) -> u64 {
        self.event_timestamp
    }

    pub fn cost(&self) -> i64 {
        self.cost
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Start of the window this request lands in.
    pub fn bucket_start(&self) -> u64 {
        self.bucket_start
    }

    /// Start of the window before this one.
    pub fn previous_bucket_start(&self) -> u64 {
        self.bucket_start.saturating_sub(window_ms(self.window))
    }

    /// Instant after which this request's bucket is gone, given how many
    /// windows the bucket is retained for.
    pub fn expires_at(&self, retention_windows: u32) -> u64 {
        self.bucket_start
            .saturating_add(window_ms(self.window).saturating_mul(u64::from(retention_windows)))
    }

    /// Share of the previous window that still counts at `event_timestamp`.
    ///
    /// Decays linearly from 1 at the start of the window towards 0 at its end.
    pub fn previous_weight(&self) -> f64 {
        let elapsed = self.event_timestamp.saturating_sub(self.bucket_start) as f64;
        1.0 - elapsed / window_ms(self.window) as f64
    }

    /// The key this request increments.
    pub fn key(&self) -> CounterKey {
        CounterKey::from_request(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_defaults() {
        let request = IncrementRequest::new("r", "l", "p", MINUTE, 61_000);
        assert_eq!(request.cost(), 1);
        assert!(request.is_distributed());
        assert_eq!(request.bucket_start(), 60_000);
        assert_eq!(request.expires_at(1), 120_000);
        assert_eq!(request.expires_at(2), 180_000);
        assert_eq!(request.ttl(), Duration::from_secs(59));
    }

    #[test]
    fn test_previous_weight_decays() {
        let at = |offset_ms: u64| IncrementRequest::new("r", "l", "p", MINUTE, 120_000 + offset_ms);
        assert_eq!(at(0).previous_weight(), 1.0);
        assert!((at(6_000).previous_weight() - 0.9).abs() < 1e-9);
        assert_eq!(at(15_000).previous_weight(), 0.75);
        assert_eq!(at(30_000).previous_weight(), 0.5);
        assert!(at(59_999).previous_weight() > 0.0);
    }

    #[test]
    fn test_try_new_rejects_zero_window() {
        let err = IncrementRequest::try_new("r", "l", "p", Duration::ZERO, 0).unwrap_err();
        assert!(err.to_string().contains("window"));
    }

    #[test]
    fn test_for_bucket_keeps_bucket_start() {
        let key = CounterKey::new("r", "l", "p", 60_000);
        let request = IncrementRequest::for_bucket(&key, MINUTE, Duration::from_millis(7_000), 4);
        assert_eq!(request.key(), key);
        assert_eq!(request.window(), MINUTE);
        assert_eq!(request.ttl(), Duration::from_millis(7_000));
        assert_eq!(request.expires_at(1), 120_000);
        assert_eq!(request.cost(), 4);
    }
}
