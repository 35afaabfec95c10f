use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use response_cache::{
    CacheConfig, CacheStrategies, CacheStrategiesBuilder, KvStore, MemoryKvStore, RedisKvStore,
    RedisKvStoreConfig,
};
use tokio::runtime::Runtime;

mod common;
use common::{BenchConfig, BenchProduct, FakeDatabase, KeyGenerator};

/// Strategies over the in-process store
fn setup_memory() -> Arc<CacheStrategies> {
    Arc::new(
        CacheStrategiesBuilder::new(Arc::new(MemoryKvStore::default()))
            .instrumented()
            .build(),
    )
}

/// Strategies over Redis, under a benchmark-only prefix
async fn setup_redis(redis_url: &str) -> Arc<CacheStrategies> {
    let redis: Arc<dyn KvStore> = Arc::new(
        RedisKvStore::new(RedisKvStoreConfig {
            url: redis_url.to_string(),
        })
        .await
        .expect("Redis connection failed"),
    );
    let config = CacheConfig {
        key_prefix: "api_cache_bench:".to_string(),
        ..CacheConfig::default()
    };

    Arc::new(CacheStrategiesBuilder::new(redis).config(config).instrumented().build())
}

fn setups(rt: &Runtime, config: &BenchConfig) -> Vec<(&'static str, Arc<CacheStrategies>)> {
    let mut setups = vec![("memory", setup_memory())];
    if config.with_redis {
        setups.push(("redis", rt.block_on(setup_redis(&config.redis_url))));
    }
    setups
}

async fn load(cache: &CacheStrategies, db: &FakeDatabase, key: &str, origin_key: &str) {
    let db = db.clone();
    let origin_key = origin_key.to_string();
    let result: Result<BenchProduct, _> = cache
        .cache_aside(key, move |_k| async move { db.get(&origin_key).await }, None)
        .await;
    let _ = black_box(result);
}

/// Benchmark 1: Hot Cache (all hits, pure cache read performance)
fn bench_hot_cache(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("hot_cache");
    group.sample_size(config.sample_size);

    let db = FakeDatabase::new(1000, config.db_latency_ms);
    let keys = KeyGenerator::new(1000).sequential();
    group.throughput(Throughput::Elements(keys.len() as u64));

    for (name, cache) in setups(&rt, config) {
        // Pre-populate cache
        rt.block_on(async {
            for key in &keys {
                load(&cache, &db, key, key).await;
            }
        });

        group.bench_with_input(BenchmarkId::new("cache_aside", name), &cache, |b, cache| {
            b.to_async(&rt).iter(|| async {
                for key in &keys {
                    load(cache, &db, key, key).await;
                }
            });
        });
    }

    group.finish();
}

/// Benchmark 2: Cold Cache (all misses, origin load performance)
fn bench_cold_cache(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("cold_cache");
    group.sample_size(config.sample_size.min(20)); // Fewer samples due to origin latency
    group.measurement_time(Duration::from_secs(20));

    let db = FakeDatabase::new(100, config.db_latency_ms);
    let keys = KeyGenerator::new(100).sequential();
    let round = Arc::new(AtomicUsize::new(0));

    for (name, cache) in setups(&rt, config) {
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| {
                let cache = cache.clone();
                let db = db.clone();
                let keys = keys.clone();
                let n = round.fetch_add(1, Ordering::Relaxed);
                async move {
                    // A fresh suffix per round keeps every lookup a miss
                    for key in keys.iter().take(10) {
                        load(&cache, &db, &format!("{}?round={}", key, n), key).await;
                    }
                }
            });
        });
    }

    group.finish();
}

/// Benchmark 3: Mixed Workload (80% hot keys - realistic)
fn bench_mixed_workload(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("mixed_workload");
    group.sample_size(config.sample_size.min(30));

    let db = FakeDatabase::new(500, config.db_latency_ms);
    let key_gen = KeyGenerator::new(500);

    for (name, cache) in setups(&rt, config) {
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| {
                let cache = cache.clone();
                let db = db.clone();
                let keys = key_gen.mixed(0.8);
                async move {
                    for key in keys.iter().take(50) {
                        load(&cache, &db, key, key).await;
                    }
                }
            });
        });
    }

    group.finish();
}

/// Benchmark 4: Write-behind vs write-through for a burst of updates
fn bench_writes(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("writes");
    group.sample_size(config.sample_size.min(20));

    let db = FakeDatabase::new(0, config.db_latency_ms);
    let products: Vec<BenchProduct> = (0..100).map(BenchProduct::new).collect();
    group.throughput(Throughput::Elements(products.len() as u64));

    for (name, cache) in setups(&rt, config) {
        group.bench_function(BenchmarkId::new("write_through", name), |b| {
            b.to_async(&rt).iter(|| async {
                for product in &products {
                    let db = db.clone();
                    let _ = cache
                        .write_through(
                            &key_for(product),
                            product.clone(),
                            move |p: BenchProduct| async move {
                                db.save_batch([(key_for(&p), p)].into_iter().collect()).await
                            },
                            None,
                        )
                        .await;
                }
            });
        });

        group.bench_function(BenchmarkId::new("write_behind", name), |b| {
            b.to_async(&rt).iter(|| async {
                let queue = cache.create_write_behind::<BenchProduct>(None, Some(50));
                for product in &products {
                    let db = db.clone();
                    queue
                        .write(&key_for(product), product.clone(), move |batch: HashMap<String, BenchProduct>| {
                            let db = db.clone();
                            async move { db.save_batch(batch).await }
                        })
                        .await;
                }
                let _ = black_box(queue.shutdown().await);
            });
        });
    }

    group.finish();
}

fn key_for(product: &BenchProduct) -> String {
    format!("api_cache:/api/products/{}", product.id)
}

fn run_benchmarks(c: &mut Criterion) {
    let config = BenchConfig::new();

    eprintln!("\n=== Running Benchmarks ===\n");

    bench_hot_cache(c, &config);
    bench_cold_cache(c, &config);
    bench_mixed_workload(c, &config);
    bench_writes(c, &config);
}

criterion_group!(benches, run_benchmarks);
criterion_main!(benches);
