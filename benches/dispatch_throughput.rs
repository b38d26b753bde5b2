//! Throughput benchmark using criterion.
//!
//! Measures dispatch plus wait for flat batches of tiny jobs, sized to fit the
//! small fiber pool so nothing is skipped.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fiberdispatch::{Dispatcher, DispatcherConfig, JobDesc, JobPriority};

const POOL_SIZE: u16 = 512;

fn bench_flat_batches(c: &mut Criterion) {
    let dispatcher = Dispatcher::new();
    dispatcher
        .init(DispatcherConfig::with_pools(POOL_SIZE, 64, 32, 512))
        .expect("init failed");

    let mut group = c.benchmark_group("dispatch_throughput");
    for batch in [16usize, 128, 512] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("flat", batch), &batch, |b, &batch| {
            b.iter(|| {
                let jobs = (0..batch).map(|_| {
                    JobDesc::new(JobPriority::Normal, |_| {
                        std::hint::black_box(1 + 1);
                    })
                });
                let handle = dispatcher.dispatch_small(jobs).unwrap();
                dispatcher.wait(handle).unwrap();
            });
        });
    }
    group.finish();

    dispatcher.shutdown().unwrap();
}

fn bench_mixed_priorities(c: &mut Criterion) {
    let dispatcher = Dispatcher::new();
    dispatcher
        .init(DispatcherConfig::with_pools(POOL_SIZE, 64, 32, 512))
        .expect("init failed");

    c.bench_function("dispatch_mixed_priorities_256", |b| {
        b.iter(|| {
            let jobs = (0..256).map(|i| {
                JobDesc::new(JobPriority::ALL[i % JobPriority::COUNT], |ctx| {
                    std::hint::black_box(ctx.index());
                })
            });
            let handle = dispatcher.dispatch_small(jobs).unwrap();
            dispatcher.wait(handle).unwrap();
        });
    });

    dispatcher.shutdown().unwrap();
}

criterion_group!(benches, bench_flat_batches, bench_mixed_priorities);
criterion_main!(benches);
