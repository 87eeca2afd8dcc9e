//! Counter identity and window arithmetic.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::duration_ms;
use crate::counter::IncrementRequest;

/// Identity of one counter: `(resource, limit_name, property, bucket_start)`.
///
/// `bucket_start` is the epoch-aligned start of the fixed window the counter
/// belongs to, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterKey {
    resource: String,
    limit_name: String,
    property: String,
    bucket_start: u64,
}

impl CounterKey {
    /// Create a key for an already aligned bucket.
    pub fn new(
        resource: impl Into<String>,
        limit_name: impl Into<String>,
        property: impl Into<String>,
        bucket_start: u64,
    ) -> Self {
        Self {
            resource: resource.into(),
            limit_name: limit_name.into(),
            property: property.into(),
            bucket_start,
        }
    }

    /// The key a request increments.
    pub fn from_request(request: &IncrementRequest) -> Self {
        Self::new(
            request.resource(),
            request.limit_name(),
            request.property(),
            request.bucket_start(),
        )
    }

    /// Same counter identity, other bucket.
    pub fn with_bucket_start(&self, bucket_start: u64) -> Self {
        Self {
            bucket_start,
            ..self.clone()
        }
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

    pub fn bucket_start(&self) -> u64 {
        self.bucket_start
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.resource, self.limit_name, self.property, self.bucket_start
        )
    }
}

/// Window length in milliseconds, never zero.
pub(crate) fn window_ms(window: Duration) -> u64 {
    duration_ms(window).max(1)
}

/// Start of the epoch-aligned window containing `timestamp_ms`.
pub fn bucket_start(timestamp_ms: u64, window: Duration) -> u64 {
    let window = window_ms(window);
    (timestamp_ms / window) * window
}

/// Start of the window preceding the one containing `timestamp_ms`.
pub fn previous_bucket_start(timestamp_ms: u64, window: Duration) -> u64 {
    bucket_start(timestamp_ms, window).saturating_sub(window_ms(window))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_start_floors_to_window() {
        let window = Duration::from_secs(60);
        assert_eq!(bucket_start(0, window), 0);
        assert_eq!(bucket_start(59_999, window), 0);
        assert_eq!(bucket_start(60_000, window), 60_000);
        assert_eq!(bucket_start(125_500, window), 120_000);
        assert_eq!(previous_bucket_start(125_500, window), 60_000);
    }

    #[test]
    fn test_previous_bucket_saturates_at_epoch() {
        assert_eq!(previous_bucket_start(10, Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_key_equality_ignores_nothing() {
        let a = CounterKey::new("r", "l", "p", 1000);
        let b = CounterKey::new("r", "l", "p", 1000);
        assert_eq!(a, b);
        assert_ne!(a, a.with_bucket_start(2000));
        assert_ne!(a, CounterKey::new("r", "l", "q", 1000));
        assert_eq!(a.to_string(), "r/l/p@1000");
    }
}
