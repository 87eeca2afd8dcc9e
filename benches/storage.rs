//! Benchmarks for counter storage operations.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use skp_windowstore::clock::current_timestamp_ms;
use skp_windowstore::{
    BatchSyncStorage, CounterFilter, CounterStorage, IncrementRequest, MemoryStorage,
    SlidingWindowStorage, SyncConfig, WriteThroughStorage,
};
use std::time::Duration;
use tokio::runtime::Runtime;

const WINDOW: Duration = Duration::from_secs(3600);

fn request(property: &str) -> IncrementRequest {
    IncrementRequest::new("bench", "limit", property, WINDOW, current_timestamp_ms())
}

fn bench_cache_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    group.bench_function("apply_single", |b| {
        let cache = MemoryStorage::new();
        let batch = [request("user:1")];
        b.iter(|| black_box(cache.apply_batch(&batch)))
    });

    group.bench_function("apply_batch_10", |b| {
        let cache = MemoryStorage::new();
        let batch: Vec<_> = (0..10).map(|i| request(&format!("user:{i}"))).collect();
        b.iter(|| black_box(cache.apply_batch(&batch)))
    });

    group.bench_function("apply_spread_keys", |b| {
        let cache = MemoryStorage::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let batch = [request(&format!("user:{}", i % 1000))];
            black_box(cache.apply_batch(&batch))
        })
    });

    group.finish();
}

fn bench_query_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_scaling");

    for num_keys in [100, 1000, 10000].iter() {
        let cache = MemoryStorage::new();
        let batch: Vec<_> = (0..*num_keys)
            .map(|i| request(&format!("user:{i}")))
            .collect();
        cache.apply_batch(&batch);

        group.bench_with_input(BenchmarkId::new("by_property", num_keys), num_keys, |b, _| {
            let filter = CounterFilter::resource_limit_and_property("bench", "limit", "user:1");
            b.iter(|| black_box(cache.counters(&filter)))
        });

        group.bench_with_input(BenchmarkId::new("all", num_keys), num_keys, |b, _| {
            b.iter(|| black_box(cache.debug_counters()))
        });
    }

    group.finish();
}

fn bench_strategies(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("strategies");
    let config = SyncConfig::every(Duration::from_millis(100));

    group.bench_function("direct", |b| {
        let storage = MemoryStorage::new();
        b.iter(|| rt.block_on(async { black_box(storage.add_one(request("user:1")).await) }))
    });

    group.bench_function("write_through", |b| {
        let storage = rt.block_on(async {
            WriteThroughStorage::new(MemoryStorage::new(), config.clone())
        });
        b.iter(|| rt.block_on(async { black_box(storage.add_one(request("user:1")).await) }))
    });

    group.bench_function("batch_sync", |b| {
        let storage = rt
            .block_on(async { BatchSyncStorage::new(MemoryStorage::new(), config.clone()) })
            .unwrap();
        b.iter(|| rt.block_on(async { black_box(storage.add_one(request("user:1")).await) }))
    });

    group.bench_function("sliding_window", |b| {
        let storage = rt
            .block_on(async { SlidingWindowStorage::new(MemoryStorage::new(), config.clone()) })
            .unwrap();
        b.iter(|| rt.block_on(async { black_box(storage.add_one(request("user:1")).await) }))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cache_operations,
    bench_query_scaling,
    bench_strategies
);
criterion_main!(benches);
