use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ratekeeper::algorithms::build_algorithm;
use ratekeeper::{Algorithm, LimiterConfig, MemoryBackend};
use std::sync::Arc;

fn benchmark_algorithm_checks(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");

    for algorithm in Algorithm::ALL {
        // a limit high enough that the hot path stays on the allowed branch
        let config = LimiterConfig::new(algorithm, 1_000_000, 60_000);
        let backend = Arc::new(MemoryBackend::new());
        let limiter = build_algorithm(&config, backend).expect("Failed to build algorithm");

        let name = format!("check_{}", algorithm.as_str().to_lowercase());
        c.bench_function(&name, |b| {
            b.iter(|| {
                rt.block_on(limiter.check(black_box("bench-key"), black_box(30_000)))
                    .unwrap()
            })
        });
    }
}

fn benchmark_contended_key(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");

    let config = LimiterConfig::new(Algorithm::FixedWindow, 1_000_000, 60_000);
    let backend = Arc::new(MemoryBackend::new());
    let limiter = build_algorithm(&config, backend).expect("Failed to build algorithm");

    c.bench_function("fixed_window_contended", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::with_capacity(8);
                for _ in 0..8 {
                    let limiter = limiter.clone();
                    handles.push(tokio::spawn(async move {
                        limiter.check("hot-key", 30_000).await.unwrap()
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            })
        })
    });
}

criterion_group!(benches, benchmark_algorithm_checks, benchmark_contended_key);
criterion_main!(benches);
