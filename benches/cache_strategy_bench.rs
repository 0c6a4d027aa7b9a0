// benches/cache_strategy_bench.rs

//! Benchmarks the Cache Strategy's hot paths: category-namespaced get/set
//! and LRU admission (spec §2 identifies cache strategy get/set as one of
//! the two largest implementation shares in the core).

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use playhub_core::cache_strategy::{CacheCategory, CacheStrategy};
use playhub_core::config::CacheConfig;
use playhub_core::store::CacheStoreAdapter;
use playhub_core::store::cache_adapter::fake::FakeCacheBackend;
use tokio::runtime::Runtime;

fn bench_strategy(max_capacity: usize) -> CacheStrategy {
    let backend = Arc::new(FakeCacheBackend::new());
    let store = CacheStoreAdapter::new(backend, "bench");
    let mut config = CacheConfig::default();
    config.max_capacity = max_capacity;
    config.eviction_threshold = 0.9;
    config.eviction_batch_size = 64;
    CacheStrategy::new(store, config)
}

fn bench_set(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let strategy = bench_strategy(100_000);

    c.bench_function("cache_strategy_set", |b| {
        b.to_async(&rt).iter(|| async {
            strategy
                .set(
                    CacheCategory::PlayerPosition,
                    black_box("player:42:position"),
                    &black_box([1.0_f64, 2.0, 3.0]),
                    None,
                )
                .await
                .unwrap();
        });
    });
}

fn bench_get_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let strategy = bench_strategy(100_000);
    rt.block_on(async {
        strategy
            .set(CacheCategory::PlayerState, "player:42:state", &"idle".to_string(), None)
            .await
            .unwrap();
    });

    c.bench_function("cache_strategy_get_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let value: Option<String> = strategy
                .get(CacheCategory::PlayerState, black_box("player:42:state"))
                .await
                .unwrap();
            black_box(value);
        });
    });
}

fn bench_admission_under_eviction_pressure(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let strategy = bench_strategy(256);

    c.bench_function("cache_strategy_set_with_eviction", |b| {
        let mut i: u64 = 0;
        b.to_async(&rt).iter(|| {
            i += 1;
            let key = format!("k{i}");
            let strategy = &strategy;
            async move {
                strategy
                    .set(CacheCategory::RoomState, &key, &black_box(i), None)
                    .await
                    .unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_set, bench_get_hit, bench_admission_under_eviction_pressure);
criterion_main!(benches);
