//! Statistical checks of the estimator at 10^8 samples and above.
//!
//! The bound is `|estimate - pi| <= k / sqrt(N)` with `k = 5`. The estimator's
//! standard error is `4 * sqrt(p(1-p)/N) ~= 1.64 / sqrt(N)`, so `k = 5` is
//! about three standard errors and a healthy generator fails well under 1%
//! of seeds.

use montepi_core::prelude::*;

const K: f64 = 5.0;

fn estimate(seed: u32, dispatches: u32) -> Counts {
    let geometry = DispatchGeometry::default();
    let mut sampler = CpuSampler::seeded(geometry, seed).expect("Failed to create sampler");
    for frame in 0..dispatches {
        let params = SimParams {
            seed,
            global_time: frame,
            batch_size: 512,
            write_threshold: 0,
        };
        sampler
            .dispatch(&params, ReductionStrategy::Subgroup)
            .expect("Dispatch failed");
    }
    sampler.counts()
}

/// One seed at ~1.3e8 samples.
#[test]
fn test_converges_within_bound() {
    let counts = estimate(1, 1);
    assert!(counts.total >= 100_000_000);
    let bound = K / (counts.total as f64).sqrt();
    let error = counts.empirical_error().unwrap();
    assert!(error <= bound, "error {} exceeds bound {}", error, bound);
}

/// Repeated independent seeds: failures must be rare, not systematic.
#[test]
#[ignore] // Slow in debug builds; run with --release -- --ignored
fn test_converges_across_seeds() {
    let seeds = [3u32, 17, 101, 4242, 65_537, 1_000_003, 0xDEAD_BEEF, 0x0BAD_F00D];
    let mut failures = 0;
    let mut ratios = Vec::new();

    for seed in seeds {
        let counts = estimate(seed, 1);
        let theoretical = 1.0 / (counts.total as f64).sqrt();
        let ratio = counts.empirical_error().unwrap() / theoretical;
        ratios.push(ratio);
        if ratio > K {
            failures += 1;
        }
    }

    assert!(failures <= 1, "too many seeds outside the bound: {:?}", ratios);
    // Mean |Z| for the estimator is ~1.3 in these units; a biased mapping
    // would push every seed out together.
    let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
    assert!(mean < 3.0, "mean error ratio {} suggests bias", mean);
}

/// Unit-square points are uniform: each quadrant receives a quarter.
#[test]
fn test_bit_construction_is_unbiased() {
    let mut lane = RngStateStore::from_seed(2718, 1).lanes()[0];
    let n = 2_000_000u64;
    let mut below_half = 0u64;
    let mut sum = 0.0f64;
    for _ in 0..n / 4 {
        for u in lane.next_unit_x4() {
            assert!((0.0..1.0).contains(&u));
            below_half += (u < 0.5) as u64;
            sum += u as f64;
        }
    }
    let frac = below_half as f64 / n as f64;
    // sigma = 0.5 / sqrt(n) ~= 3.5e-4
    assert!((frac - 0.5).abs() < 5.0 * 0.5 / (n as f64).sqrt());
    // Mean of the 23-bit grid is 0.5 - 2^-24.
    let mean = sum / n as f64;
    assert!((mean - 0.5).abs() < 5.0 * (1.0f64 / 12.0).sqrt() / (n as f64).sqrt());
}
