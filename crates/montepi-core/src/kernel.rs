//! Per-lane sampling semantics.
//!
//! This is the host definition of what one lane does in one dispatch; both
//! WGSL variants and the CPU mirror follow it step for step.

use crate::params::{PAIRS_PER_SUBSTREAM, SAMPLES_PER_ITERATION};
use crate::rng::LaneState;

// The loop below draws exactly two pairs per sub-stream.
const _: () = assert!(PAIRS_PER_SUBSTREAM == 2);

/// Result of one lane's batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LanePartial {
    /// Samples inside the unit quarter circle.
    pub inside: u32,
    /// Samples drawn (`batch_size * SAMPLES_PER_ITERATION`).
    pub total: u32,
    /// First sub-stream's first point of the final iteration, if any iteration ran.
    pub viz_point: Option<(f32, f32)>,
}

/// Run `batch_size` iterations on one lane, advancing its generator in place.
///
/// Each iteration draws `x1, y1, x2, y2` from all four sub-streams (four
/// generator steps) and classifies both points of every sub-stream.
pub fn sample_lane(state: &mut LaneState, batch_size: u32) -> LanePartial {
    let mut inside = [0u32; 4];
    let mut viz_point = None;

    for _ in 0..batch_size {
        let x1 = state.next_unit_x4();
        let y1 = state.next_unit_x4();
        let x2 = state.next_unit_x4();
        let y2 = state.next_unit_x4();

        for k in 0..4 {
            inside[k] += (x1[k] * x1[k] + y1[k] * y1[k] <= 1.0) as u32;
            inside[k] += (x2[k] * x2[k] + y2[k] * y2[k] <= 1.0) as u32;
        }
        viz_point = Some((x1[0], y1[0]));
    }

    LanePartial {
        inside: inside.iter().sum(),
        total: batch_size * SAMPLES_PER_ITERATION,
        viz_point,
    }
}
