// Retry and step runner overhead benchmarks
// Run with: cargo bench -p faultline-resilience

use std::hint::black_box;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use faultline_error::Error;
use faultline_resilience::{Backoff, Chain, Retry, RetryOption};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// Happy path: a single successful attempt
fn bench_retry_success(c: &mut Criterion) {
    let rt = runtime();
    let retry = Retry::default();
    c.bench_function("retry_first_attempt_success", |b| {
        b.iter(|| {
            rt.block_on(retry.execute_reply(|| async { Ok::<_, Error>(black_box(7_u32)) }))
        });
    });
}

/// Three retryable failures with a zero delay
fn bench_retry_exhausted(c: &mut Criterion) {
    let rt = runtime();
    let retry = Retry::new([
        RetryOption::MaxAttempts(3),
        RetryOption::Delay(Duration::ZERO),
        RetryOption::Backoff(Backoff::Fixed),
        RetryOption::Jitter(false),
    ]);
    c.bench_function("retry_exhausted_zero_delay", |b| {
        b.iter(|| {
            let result = rt.block_on(
                retry.execute(|| async { Err::<(), _>(Error::new("busy").with_retryable()) }),
            );
            black_box(result.is_err())
        });
    });
}

/// Five successful steps
fn bench_chain_run(c: &mut Criterion) {
    let rt = runtime();
    let mut chain = Chain::new();
    for _ in 0..5 {
        chain = chain.step(|| async { Ok::<_, Error>(()) });
    }
    c.bench_function("chain_run_5_steps", |b| {
        b.iter(|| black_box(rt.block_on(chain.run()).is_ok()));
    });
}

criterion_group!(
    benches,
    bench_retry_success,
    bench_retry_exhausted,
    bench_chain_run
);
criterion_main!(benches);
