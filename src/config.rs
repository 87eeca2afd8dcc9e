//! Configuration for caches and synchronization.
//!
//! # Examples
//!
//! ```
//! use skp_windowstore::{CacheConfig, SyncConfig};
//! use std::time::Duration;
//!
//! // Reconcile with the remote store every 250ms, wait up to 2s on close
//! let sync = SyncConfig::every(Duration::from_millis(250))
//!     .with_drain_timeout(Duration::from_secs(2));
//! assert!(sync.validate().is_ok());
//!
//! // Keep each bucket readable for two windows
//! let cache = CacheConfig::default().with_retention_windows(2);
//! assert_eq!(cache.retention_windows, 2);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Remote synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tick period of the periodic synchronizer.
    pub period: Duration,
    /// How long `close()` waits for queued background work to drain.
    pub drain_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl SyncConfig {
    /// Create config with the given tick period.
    pub fn every(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Set the tick period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the drain timeout used by `close()`.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Reject a zero period.
    pub fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(ConfigError::InvalidPeriod("period must be non-zero".into()).into());
        }
        Ok(())
    }
}

/// Local bucket cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How many window lengths a bucket stays live after its start.
    pub retention_windows: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention_windows: 1,
        }
    }
}

impl CacheConfig {
    /// Set the retention in windows.
    pub fn with_retention_windows(mut self, retention_windows: u32) -> Self {
        self.retention_windows = retention_windows;
        self
    }

    /// Reject a retention of zero windows.
    pub fn validate(&self) -> Result<()> {
        if self.retention_windows == 0 {
            return Err(
                ConfigError::InvalidWindow("retention_windows must be at least 1".into()).into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.period, Duration::from_secs(1));
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
        assert!(SyncConfig::every(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{"period":{"secs":0,"nanos":100000000}}"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.period, Duration::from_millis(100));
        assert_eq!(config.drain_timeout, Duration::from_secs(5));

        let cache: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cache, CacheConfig::default());
        assert!(CacheConfig::default().with_retention_windows(0).validate().is_err());
    }
}
