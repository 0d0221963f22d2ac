use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;
use tokio::runtime::Runtime;

use circuit_guard::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Fresh breakers per batch keep the append-only response history from
// growing across millions of iterations.

fn closed_breaker() -> CircuitBreaker {
    CircuitBreaker::new("bench-closed", CircuitBreakerConfig::default()).unwrap()
}

fn open_breaker() -> CircuitBreaker {
    let config = CircuitBreakerConfig::new(1, Duration::from_secs(3600), 1).unwrap();
    let breaker = CircuitBreaker::new("bench-open", config).unwrap();
    let _ = futures::executor::block_on(breaker.call(|| async { Err::<(), _>("down") }));
    assert_eq!(breaker.current_state(), CircuitState::Open);
    breaker
}

/// Cost of wrapping an always-successful operation while Closed
fn bench_closed_path(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("closed_path");
    group.bench_function("direct", |b| {
        b.to_async(&rt).iter(|| async { black_box(Ok::<_, ()>(42u64)) });
    });
    group.bench_function("guarded", |b| {
        b.to_async(&rt).iter_batched(
            closed_breaker,
            |breaker| async move { black_box(breaker.call(|| async { Ok::<_, ()>(42u64) }).await.is_ok()) },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

/// Cost of rejecting a call while Open
fn bench_rejection_path(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("rejection_path", |b| {
        b.to_async(&rt).iter_batched(
            open_breaker,
            |breaker| async move { black_box(breaker.call(|| async { Ok::<_, &str>(()) }).await.is_err()) },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_closed_path, bench_rejection_path);
criterion_main!(benches);
