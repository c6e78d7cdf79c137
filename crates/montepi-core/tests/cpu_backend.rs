//! Integration tests for the CPU mirror of the sampling kernel.

use montepi_core::prelude::*;

fn params(batch_size: u32, frame: u32) -> SimParams {
    SimParams {
        seed: 42,
        global_time: frame,
        batch_size,
        write_threshold: 0,
    }
}

/// 32768 lanes, batch 64, ten dispatches.
#[test]
fn test_reference_scenario() {
    let geometry = DispatchGeometry::default();
    assert_eq!(geometry.lane_count(), 32768);

    let mut sampler = CpuSampler::seeded(geometry, 42).expect("Failed to create sampler");
    for frame in 0..10 {
        sampler
            .dispatch(&params(64, frame), ReductionStrategy::Workgroup)
            .expect("Dispatch failed");
    }

    let counts = sampler.counts();
    assert_eq!(counts.total, 167_772_160);
    let pi = counts.pi_estimate().unwrap();
    assert!(
        (pi - std::f64::consts::PI).abs() < 0.01,
        "estimate {} too far from pi",
        pi
    );
}

/// The exact total only depends on geometry, batch size and dispatch count.
#[test]
fn test_totals_are_exact() {
    for (seed, gx, gy, batch, dispatches) in [
        (0u32, 1u32, 1u32, 1u32, 1u32),
        (7, 3, 1, 17, 4),
        (99, 2, 3, 100, 2),
        (12345, 5, 2, 333, 3),
    ] {
        let geometry = DispatchGeometry::new(gx, gy).unwrap();
        let mut sampler = CpuSampler::seeded(geometry, seed).unwrap();
        for frame in 0..dispatches {
            sampler
                .dispatch(&params(batch, frame), ReductionStrategy::Subgroup)
                .unwrap();
        }

        let expected = geometry.samples_per_dispatch(batch) * dispatches as u64;
        let counts = sampler.counts();
        assert_eq!(counts.total, expected, "seed {} geometry {}x{}", seed, gx, gy);
        assert!(counts.inside <= counts.total);
    }
}

/// Both reduction strategies produce identical shards, not just identical sums.
#[test]
fn test_reduction_strategy_equivalence() {
    let geometry = DispatchGeometry::new(8, 2).unwrap();
    let mut workgroup = CpuSampler::seeded(geometry, 2024).unwrap();
    let mut subgroup32 = CpuSampler::seeded(geometry, 2024).unwrap();
    let mut subgroup16 = CpuSampler::seeded(geometry, 2024)
        .unwrap()
        .with_subgroup_width(16)
        .unwrap();

    for frame in 0..3 {
        let p = params(128, frame);
        workgroup.dispatch(&p, ReductionStrategy::Workgroup).unwrap();
        subgroup32.dispatch(&p, ReductionStrategy::Subgroup).unwrap();
        subgroup16.dispatch(&p, ReductionStrategy::Subgroup).unwrap();
    }

    assert_eq!(workgroup.snapshot(), subgroup32.snapshot());
    assert_eq!(workgroup.snapshot(), subgroup16.snapshot());
    assert_eq!(workgroup.rng(), subgroup32.rng());
    assert_eq!(workgroup.viz(), subgroup16.viz());
}

/// Many groups share each shard once the group count exceeds the shard count.
#[test]
fn test_shards_shared_across_groups() {
    let geometry = DispatchGeometry::new(SHARD_COUNT + 6, 1).unwrap();
    let mut sampler = CpuSampler::seeded(geometry, 3).unwrap();
    sampler
        .dispatch(&params(1, 0), ReductionStrategy::Workgroup)
        .unwrap();

    let per_group = (WORKGROUP_SIZE * 8) as u64;
    let slots = sampler.snapshot();
    assert_eq!(slots.len(), SHARD_COUNT as usize);
    assert_eq!(slots[0].total(), 2 * per_group);
    assert_eq!(slots[5].total(), 2 * per_group);
    assert_eq!(slots[6].total(), per_group);
}

#[test]
fn test_state_never_degenerates() {
    let geometry = DispatchGeometry::new(2, 1).unwrap();
    let mut sampler = CpuSampler::seeded(geometry, 0).unwrap();
    for frame in 0..20 {
        sampler
            .dispatch(&params(50, frame), ReductionStrategy::Workgroup)
            .unwrap();
        assert!(sampler.rng().lanes().iter().all(|l| !l.is_degenerate()));
    }
}

/// Resuming from a savepoint continues the stream exactly.
#[test]
fn test_savepoint_resume() {
    let geometry = DispatchGeometry::new(2, 2).unwrap();
    let mut straight = CpuSampler::seeded(geometry, 77).unwrap();
    let mut first_half = CpuSampler::seeded(geometry, 77).unwrap();

    straight.dispatch(&params(10, 0), ReductionStrategy::Workgroup).unwrap();
    straight.dispatch(&params(10, 1), ReductionStrategy::Workgroup).unwrap();

    first_half.dispatch(&params(10, 0), ReductionStrategy::Workgroup).unwrap();
    let savepoint = RngStateStore::from_bytes(first_half.rng().as_bytes()).unwrap();
    let before = first_half.counts();

    let mut resumed = CpuSampler::new(geometry, savepoint).unwrap();
    resumed.dispatch(&params(10, 1), ReductionStrategy::Workgroup).unwrap();

    let mut combined = before;
    combined.accumulate(resumed.counts());
    assert_eq!(combined, straight.counts());
}

#[test]
fn test_clear_and_session_reset() {
    let geometry = DispatchGeometry::new(1, 1).unwrap();
    let mut sampler = CpuSampler::seeded(geometry, 5).unwrap();
    let mut session = SimulationSession::new(5, 32, BenchmarkConfig::default()).unwrap();

    let p = session.next_params(session.batch_size());
    sampler.dispatch(&p, ReductionStrategy::Workgroup).unwrap();
    session.record(sampler.counts(), std::time::Instant::now());
    sampler.clear();

    assert_eq!(sampler.counts(), Counts::default());
    assert_eq!(session.counts().total, 256 * 32 * 8);

    session.reset();
    session.reset();
    assert_eq!(session.counts(), Counts::default());
    assert_eq!(session.frame(), 0);
    assert_eq!(session.benchmark().phase(), BenchmarkPhase::Idle);
}

#[test]
fn test_reseed_changes_stream() {
    let geometry = DispatchGeometry::new(1, 1).unwrap();
    let mut a = CpuSampler::seeded(geometry, 1).unwrap();
    let mut b = CpuSampler::seeded(geometry, 1).unwrap();
    b.reseed(RngStateStore::from_seed(2, geometry.lane_count()))
        .unwrap();
    assert!(b.reseed(RngStateStore::from_seed(2, 3)).is_err());

    a.dispatch(&params(64, 0), ReductionStrategy::Workgroup).unwrap();
    b.dispatch(&params(64, 0), ReductionStrategy::Workgroup).unwrap();
    assert_eq!(a.counts().total, b.counts().total);
    assert_ne!(a.rng(), b.rng());
}
