//! Integration tests for periodic batch synchronization.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FlakyStore, request};
use skp_windowstore::{BatchSyncStorage, CounterFilter, CounterStorage, SyncConfig};

fn every(period_ms: u64) -> SyncConfig {
    SyncConfig::every(Duration::from_millis(period_ms))
}

const NEVER: Duration = Duration::from_secs(3600);

#[tokio::test(start_paused = true)]
async fn test_one_period_reconciles_remote_and_local() {
    let storage = BatchSyncStorage::new(FlakyStore::new(), every(100)).unwrap();

    for _ in 0..5 {
        storage.add_one(request("a", 2)).await.unwrap();
    }
    storage.add_one(request("b", 1)).await.unwrap();
    assert!(storage.remote().totals().is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;

    let remote = storage.remote().totals();
    assert_eq!(remote[&request("a", 0).key()], 10);
    assert_eq!(remote[&request("b", 0).key()], 1);
    assert_eq!(storage.cached_counters(&CounterFilter::All), remote);
    storage.cache().for_each_bucket(|_, bucket| {
        assert!(bucket.values().all(|value| value.delta == 0));
    });

    storage.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_remote_writes_scale_with_keys_not_calls() {
    let storage = BatchSyncStorage::new(FlakyStore::new(), every(100)).unwrap();

    for i in 0..1000 {
        let property = if i % 2 == 0 { "even" } else { "odd" };
        storage.add_one(request(property, 1)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(storage.remote().calls(), 2);
    let remote = storage.remote().totals();
    assert_eq!(remote[&request("even", 0).key()], 500);
    assert_eq!(remote[&request("odd", 0).key()], 500);

    // An idle period still sends one zero-cost request per live key
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(storage.remote().calls(), 4);
    assert_eq!(storage.remote().totals(), remote);
}

#[tokio::test]
async fn test_failed_key_does_not_stop_others() {
    let storage = BatchSyncStorage::new(FlakyStore::failing_on("bad"), SyncConfig::every(NEVER))
        .unwrap();

    storage.add_one(request("bad", 3)).await.unwrap();
    storage.add_one(request("good", 4)).await.unwrap();

    let report = storage.sync_now().await;
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 1);
    assert!(!report.skipped);

    let remote = storage.remote().totals();
    assert_eq!(remote[&request("good", 0).key()], 4);
    assert!(!remote.contains_key(&request("bad", 0).key()));

    // The failed key keeps its delta for the next pass
    let bad = request("bad", 0).key();
    storage.cache().for_each_bucket(|_, bucket| {
        if let Some(value) = bucket.get(&bad) {
            assert_eq!(value.delta, 3);
        }
    });
}

#[tokio::test]
async fn test_outage_is_retried_on_next_pass() {
    let storage = BatchSyncStorage::new(FlakyStore::new(), SyncConfig::every(NEVER)).unwrap();

    storage.add_one(request("a", 1)).await.unwrap();
    storage.remote().set_failing(true);
    assert_eq!(storage.sync_now().await.failed, 1);

    storage.add_one(request("a", 1)).await.unwrap();
    storage.remote().set_failing(false);
    assert_eq!(storage.sync_now().await.synced, 1);

    assert_eq!(storage.remote().totals()[&request("a", 0).key()], 2);
}

#[tokio::test(start_paused = true)]
async fn test_increments_racing_a_pass_are_kept() {
    let remote = FlakyStore::new().with_delay(Duration::from_millis(50));
    let storage = Arc::new(BatchSyncStorage::new(remote, SyncConfig::every(NEVER)).unwrap());
    let key = request("a", 0).key();

    storage.add_one(request("a", 3)).await.unwrap();

    let pass = tokio::spawn({
        let storage = storage.clone();
        async move { storage.sync_now().await }
    });
    tokio::task::yield_now().await;

    // The pass is waiting on the remote store
    assert!(storage.sync_now().await.skipped);
    storage.add_one(request("a", 5)).await.unwrap();

    assert_eq!(pass.await.unwrap().synced, 1);
    // Remote total 3 plus the unsent 5: the local view never drops
    storage.cache().for_each_bucket(|_, bucket| {
        let value = bucket[&key];
        assert_eq!(value.total, 8);
        assert_eq!(value.delta, 5);
    });

    storage.sync_now().await;
    assert_eq!(storage.remote().totals()[&key], 8);
    assert_eq!(storage.cached_counters(&CounterFilter::All)[&key], 8);
}

#[tokio::test]
async fn test_queries_read_remote() {
    let storage = BatchSyncStorage::new(FlakyStore::new(), SyncConfig::every(NEVER)).unwrap();

    storage.add_one(request("a", 2)).await.unwrap();
    assert!(storage.query_all().await.unwrap().is_empty());
    assert_eq!(storage.cached_counters(&CounterFilter::All).len(), 1);

    storage.sync_now().await;
    let counters = storage
        .query_by_resource_and_limit("api", "per_user")
        .await
        .unwrap();
    assert_eq!(counters[&request("a", 0).key()], 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_timer() {
    let storage = BatchSyncStorage::new(FlakyStore::new(), every(100)).unwrap();
    storage.add_one(request("a", 1)).await.unwrap();

    storage.close().await.unwrap();
    storage.close().await.unwrap();
    assert_eq!(storage.remote().closes(), 1);

    // No final flush and no further ticks
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(storage.remote().calls(), 0);
}

#[tokio::test]
async fn test_zero_period_is_rejected() {
    let result = BatchSyncStorage::new(FlakyStore::new(), SyncConfig::every(Duration::ZERO));
    assert!(result.is_err());
}
