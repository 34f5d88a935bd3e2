//! Benchmarks for rate limiting policies.

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use tollgate::{
    CompoundLimiter, FixedWindowLimiter, Limiter, LimiterConfig, LimiterFactory, MemoryStorage,
    Policy, Rate, RateLimiterFactory, SlidingWindowLimiter, TokenBucketLimiter,
};

const KEYS: u64 = 100;

/// One limiter per key, built by `make`.
fn limiters<L, F>(make: F) -> Vec<L>
where
    F: Fn(String) -> L,
{
    (0..KEYS).map(|i| make(format!("bench:{i}"))).collect()
}

fn bench_policies(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("policies");

    // Fixed Window
    group.bench_function("fixed_window", |b| {
        let storage = Arc::new(MemoryStorage::new());
        let limiters = limiters(|id| {
            FixedWindowLimiter::new(id, 1_000, Duration::from_secs(1), storage.clone()).unwrap()
        });
        let mut i = 0usize;
        b.iter(|| {
            i += 1;
            let limiter = &limiters[i % limiters.len()];
            rt.block_on(async { black_box(limiter.consume(1).await) })
        })
    });

    // Sliding Window
    group.bench_function("sliding_window", |b| {
        let storage = Arc::new(MemoryStorage::new());
        let limiters = limiters(|id| {
            SlidingWindowLimiter::new(id, 1_000, Duration::from_secs(1), storage.clone()).unwrap()
        });
        let mut i = 0usize;
        b.iter(|| {
            i += 1;
            let limiter = &limiters[i % limiters.len()];
            rt.block_on(async { black_box(limiter.consume(1).await) })
        })
    });

    // Token Bucket
    group.bench_function("token_bucket", |b| {
        let storage = Arc::new(MemoryStorage::new());
        let limiters = limiters(|id| {
            TokenBucketLimiter::new(id, 100, Rate::per_second(1_000), storage.clone()).unwrap()
        });
        let mut i = 0usize;
        b.iter(|| {
            i += 1;
            let limiter = &limiters[i % limiters.len()];
            rt.block_on(async { black_box(limiter.consume(1).await) })
        })
    });

    // Compound
    group.bench_function("compound", |b| {
        let storage = Arc::new(MemoryStorage::new());
        let limiters = limiters(|id| {
            CompoundLimiter::new(vec![
                Box::new(
                    TokenBucketLimiter::new(
                        format!("{id}:burst"),
                        100,
                        Rate::per_second(1_000),
                        storage.clone(),
                    )
                    .unwrap(),
                ),
                Box::new(
                    FixedWindowLimiter::new(
                        format!("{id}:hourly"),
                        u64::MAX / 2,
                        Duration::from_secs(3_600),
                        storage.clone(),
                    )
                    .unwrap(),
                ),
            ])
            .unwrap()
        });
        let mut i = 0usize;
        b.iter(|| {
            i += 1;
            let limiter = &limiters[i % limiters.len()];
            rt.block_on(async { black_box(limiter.consume(1).await) })
        })
    });

    group.finish();
}

fn bench_factory_per_request(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("factory_per_request");

    for num_keys in [1u64, 10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("fixed_window", num_keys),
            num_keys,
            |b, &num_keys| {
                let config = LimiterConfig::builder("api")
                    .policy(Policy::FixedWindow)
                    .limit(10_000)
                    .interval(Duration::from_secs(1))
                    .build()
                    .unwrap();
                let factory =
                    RateLimiterFactory::new(config, Arc::new(MemoryStorage::new())).unwrap();
                let mut i = 0u64;
                b.iter(|| {
                    i += 1;
                    let key = format!("k:{}", i % num_keys);
                    let limiter = factory.create(Some(&key)).unwrap();
                    rt.block_on(async { black_box(limiter.consume(1).await) })
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_policies, bench_factory_per_request);
criterion_main!(benches);
