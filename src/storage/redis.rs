//! Redis remote counter store.
//!
//! Each counter is a plain integer key. Increments run as one atomic pipeline
//! of `INCRBY` plus `PEXPIRE .. NX`, so a counter gets its TTL only when the
//! increment creates it. Requires Redis 7 or later for `NX`.

use std::time::Duration;

use deadpool_redis::redis::{self, cmd};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use tracing::{debug, info};

use crate::counter::{CounterFilter, CounterKey, IncrementRequest};
use crate::error::{ConnectionError, Result, StorageError};
use crate::storage::{CounterStorage, Counters};

const SCAN_COUNT: usize = 500;

/// Redis storage configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Prefix for counter keys
    pub key_prefix: String,
    /// How long to wait for the first connection
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "wc:".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Remote counter store backed by Redis.
///
/// # Example
///
/// ```ignore
/// use skp_windowstore::{BatchSyncStorage, RedisConfig, RedisCounterStore, SyncConfig};
///
/// let config = RedisConfig::new("redis://localhost:6379").with_prefix("myapp:wc:");
/// let remote = RedisCounterStore::new(config).await?;
/// let storage = BatchSyncStorage::new(remote, SyncConfig::default())?;
/// ```
pub struct RedisCounterStore {
    pool: Pool,
    key_prefix: String,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisCounterStore {
    /// Connect and check the server answers `PING`.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_url(&config.url);
        cfg.pool = Some(PoolConfig::new(config.pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        let mut conn = tokio::time::timeout(config.connection_timeout, pool.get())
            .await
            .map_err(|_| ConnectionError::Timeout(config.connection_timeout))?
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let _: () = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        info!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis counter store");
        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
        })
    }

    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    fn encode_key(&self, key: &CounterKey) -> Result<String> {
        encode_key(&self.key_prefix, key)
    }

    async fn get_conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|_| StorageError::PoolExhausted.into())
    }

    /// Every key under this store's prefix.
    async fn scan_keys(&self, conn: &mut Connection) -> Result<Vec<String>> {
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut **conn)
                .await
                .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

fn encode_key(prefix: &str, key: &CounterKey) -> Result<String> {
    let fields = (
        key.resource(),
        key.limit_name(),
        key.property(),
        key.bucket_start(),
    );
    let json =
        serde_json::to_string(&fields).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(format!("{prefix}{json}"))
}

fn decode_key(prefix: &str, raw: &str) -> Option<CounterKey> {
    let json = raw.strip_prefix(prefix)?;
    let (resource, limit_name, property, bucket_start): (String, String, String, u64) =
        serde_json::from_str(json).ok()?;
    Some(CounterKey::new(resource, limit_name, property, bucket_start))
}

fn ttl_ms(request: &IncrementRequest) -> u64 {
    u64::try_from(request.ttl().as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

impl CounterStorage for RedisCounterStore {
    async fn add_and_get(&self, requests: &[IncrementRequest]) -> Result<Counters> {
        if requests.is_empty() {
            return Ok(Counters::new());
        }

        let mut keys = Vec::with_capacity(requests.len());
        let mut pipe = redis::pipe();
        pipe.atomic();
        for request in requests {
            let key = request.key();
            let redis_key = self.encode_key(&key)?;
            pipe.cmd("INCRBY").arg(&redis_key).arg(request.cost());
            pipe.cmd("PEXPIRE")
                .arg(&redis_key)
                .arg(ttl_ms(request))
                .arg("NX")
                .ignore();
            keys.push(key);
        }

        let mut conn = self.get_conn().await?;
        let totals: Vec<i64> = pipe
            .query_async(&mut *conn)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;

        debug!(requests = requests.len(), "Incremented Redis counters");
        // Later totals for a repeated key overwrite earlier ones.
        Ok(keys.into_iter().zip(totals).collect())
    }

    async fn current_counters(&self, filter: &CounterFilter) -> Result<Counters> {
        let mut conn = self.get_conn().await?;

        let matching: Vec<(String, CounterKey)> = self
            .scan_keys(&mut conn)
            .await?
            .into_iter()
            .filter_map(|raw| {
                let key = decode_key(&self.key_prefix, &raw)?;
                filter.matches(&key).then_some((raw, key))
            })
            .collect();
        if matching.is_empty() {
            return Ok(Counters::new());
        }

        let raw_keys: Vec<&str> = matching.iter().map(|(raw, _)| raw.as_str()).collect();
        let values: Vec<Option<i64>> = cmd("MGET")
            .arg(&raw_keys)
            .query_async(&mut *conn)
            .await
            .map_err(|e| StorageError::operation_failed(e.to_string(), true))?;

        // Keys that expired between SCAN and MGET come back as nil.
        Ok(matching
            .into_iter()
            .zip(values)
            .filter_map(|((_, key), value)| value.map(|total| (key, total)))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}
