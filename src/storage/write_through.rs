//! Write-through storage with a single background sync worker.
//!
//! Each call is answered from the local cache before any network I/O. The same
//! batch is then queued to one worker that forwards the distributed requests
//! to the remote store and overrides the cache with the remote totals. The
//! queue is FIFO and unbounded, so syncs for one key are never reordered.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::counter::{CounterFilter, CounterKey, IncrementRequest, Override};
use crate::error::Result;
use crate::storage::{CounterStorage, Counters, MemoryStorage};

type Batch = Vec<IncrementRequest>;

/// Local cache with asynchronous write-through to a remote store.
///
/// Remote failures in the background are logged and dropped; the cache keeps
/// its locally applied totals until a later batch reconciles them.
///
/// # Example
///
/// ```ignore
/// use skp_windowstore::{CounterStorage, MemoryStorage, SyncConfig, WriteThroughStorage};
/// use std::time::Duration;
///
/// let storage = WriteThroughStorage::new(remote, SyncConfig::default());
/// let totals = storage.add_and_get(&requests).await?; // local totals, no network wait
///
/// storage.shutdown();
/// let drained = storage.await_termination(Duration::from_secs(1)).await;
/// ```
pub struct WriteThroughStorage<S> {
    cache: Arc<MemoryStorage>,
    remote: Arc<S>,
    sender: Mutex<Option<mpsc::UnboundedSender<Batch>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    terminated: Arc<AtomicBool>,
    drain_timeout: Duration,
    closed: AtomicBool,
}

impl<S> std::fmt::Debug for WriteThroughStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteThroughStorage")
            .field("cache", &self.cache)
            .field("accepting", &self.sender.lock().is_some())
            .field("terminated", &self.terminated.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<S: CounterStorage> WriteThroughStorage<S> {
    /// Wrap `remote` with a fresh cache on the system clock.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(remote: S, config: SyncConfig) -> Self {
        Self::with_cache(remote, MemoryStorage::new(), config)
    }

    /// Wrap `remote` with a caller-built cache.
    pub fn with_cache(remote: S, cache: MemoryStorage, config: SyncConfig) -> Self {
        let cache = Arc::new(cache);
        let remote = Arc::new(remote);
        let terminated = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_worker(
            cache.clone(),
            remote.clone(),
            receiver,
            terminated.clone(),
        ));

        Self {
            cache,
            remote,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            terminated,
            drain_timeout: config.drain_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &MemoryStorage {
        &self.cache
    }

    pub fn remote(&self) -> &S {
        &self.remote
    }

    /// Local view of the counters.
    pub fn cached_counters(&self, filter: &CounterFilter) -> Counters {
        self.cache.counters(filter)
    }

    /// Stop accepting background work. Queued batches are still sent.
    ///
    /// Later calls keep updating the local cache only.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            info!("Write-through storage shutting down");
        }
    }

    /// Wait up to `timeout` for the worker to drain its queue.
    ///
    /// After [`shutdown`](Self::shutdown), work still queued at the timeout is
    /// abandoned. Returns whether the queue fully drained.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let worker = self.worker.lock().take();
        let Some(mut worker) = worker else {
            return self.is_terminated();
        };

        if tokio::time::timeout(timeout, &mut worker).await.is_ok() {
            return self.is_terminated();
        }

        if self.sender.lock().is_some() {
            // Not shut down: the worker keeps running.
            *self.worker.lock() = Some(worker);
        } else {
            warn!(?timeout, "Write-through worker did not drain in time, abandoning queued work");
            worker.abort();
        }
        false
    }

    /// Whether the worker has drained its queue and exited.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

async fn run_worker<S: CounterStorage>(
    cache: Arc<MemoryStorage>,
    remote: Arc<S>,
    mut receiver: mpsc::UnboundedReceiver<Batch>,
    terminated: Arc<AtomicBool>,
) {
    while let Some(batch) = receiver.recv().await {
        send_and_cache(&cache, &*remote, batch).await;
    }
    terminated.store(true, Ordering::SeqCst);
    debug!("Write-through worker drained");
}

/// Forward the distributed part of `batch` and adopt the remote totals.
async fn send_and_cache<S: CounterStorage>(cache: &MemoryStorage, remote: &S, batch: Batch) {
    let requests: Batch = batch.into_iter().filter(|r| r.is_distributed()).collect();
    if requests.is_empty() {
        return;
    }

    let totals = match remote.add_and_get(&requests).await {
        Ok(totals) => totals,
        Err(e) => {
            warn!(requests = requests.len(), error = %e, "Failed to send and cache requests");
            return;
        }
    };

    // One override per key: the remote total after the batch's last request
    // for it, settling the summed cost this batch sent.
    let mut overrides: HashMap<CounterKey, Override> = HashMap::with_capacity(requests.len());
    let mut sent: HashMap<CounterKey, i64> = HashMap::with_capacity(requests.len());
    for request in &requests {
        let key = request.key();
        match totals.get(&key) {
            Some(&total) => {
                *sent.entry(key.clone()).or_default() += request.cost();
                overrides.insert(key, Override::for_request(request, total));
            }
            None => warn!(key = %key, "Remote store returned no total for key"),
        }
    }

    let overrides: Vec<Override> = overrides
        .into_iter()
        .map(|(key, o)| {
            let cost = sent.get(&key).copied().unwrap_or_default();
            o.with_settled(cost)
        })
        .collect();
    debug!(overrides = overrides.len(), "Applying remote totals");
    cache.override_keys(&overrides);
}

impl<S: CounterStorage> CounterStorage for WriteThroughStorage<S> {
    async fn add_and_get(&self, requests: &[IncrementRequest]) -> Result<Counters> {
        let totals = self.cache.apply_batch(requests);

        match self.sender.lock().as_ref() {
            Some(sender) => {
                if sender.send(requests.to_vec()).is_err() {
                    warn!("Write-through worker is gone, batch kept local only");
                }
            }
            None => debug!("Write-through storage is shut down, batch kept local only"),
        }

        Ok(totals)
    }

    /// Queries read the remote store, the authoritative view.
    async fn current_counters(&self, filter: &CounterFilter) -> Result<Counters> {
        self.remote.current_counters(filter).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown();
        if !self.await_termination(self.drain_timeout).await {
            warn!("Write-through storage closed before its queue drained");
        }
        self.remote.close().await
    }
}
