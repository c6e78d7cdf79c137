//! CPU mirror throughput.
//!
//! Measures samples per second of the host kernel for both reduction
//! strategies, plus the raw cost of the sharded carry-on-wrap add.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use montepi_core::prelude::*;
use montepi_core::reduction::ShardedCounter;
use montepi_core::rng::RngStateStore;

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_dispatch");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    let geometry = DispatchGeometry::new(8, 4).unwrap();
    for batch_size in [16u32, 256] {
        group.throughput(Throughput::Elements(geometry.samples_per_dispatch(batch_size)));
        for strategy in [ReductionStrategy::Workgroup, ReductionStrategy::Subgroup] {
            let mut sampler = CpuSampler::seeded(geometry, 42).unwrap();
            let params = SimParams {
                seed: 42,
                global_time: 0,
                batch_size,
                write_threshold: 0,
            };
            group.bench_with_input(
                BenchmarkId::new(strategy.as_str(), batch_size),
                &params,
                |b, params| {
                    b.iter(|| {
                        sampler.dispatch(params, strategy).unwrap();
                        black_box(sampler.counts());
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_lane_generator(c: &mut Criterion) {
    let mut group = c.benchmark_group("lane_generator");
    group.throughput(Throughput::Elements(4 * 1024));

    group.bench_function("next_unit_x4", |b| {
        let mut lane = RngStateStore::from_seed(1, 1).lanes()[0];
        b.iter(|| {
            for _ in 0..1024 {
                black_box(lane.next_unit_x4());
            }
        });
    });

    group.finish();
}

fn bench_sharded_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharded_counter");
    let counter = ShardedCounter::new();

    group.bench_function("add_with_carry", |b| {
        let mut shard = 0usize;
        b.iter(|| {
            counter.add(shard, black_box(1_000_003), black_box(2_097_152));
            shard = (shard + 1) % SHARD_COUNT as usize;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_lane_generator, bench_sharded_add);
criterion_main!(benches);
