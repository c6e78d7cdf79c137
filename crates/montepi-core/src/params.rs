//! Kernel parameter block, dispatch geometry and fixed layout constants.
//!
//! These values are shared by the WGSL kernels and the host. The shader
//! sources declare the same constants; `montepi-wgpu` checks they agree.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::{MontePiError, Result};

/// Lanes per group (`@workgroup_size`).
pub const WORKGROUP_SIZE: u32 = 256;

/// Parallel generator sub-streams per lane.
pub const SUBSTREAM_WIDTH: u32 = 4;

/// Coordinate pairs drawn from each sub-stream per batch iteration.
pub const PAIRS_PER_SUBSTREAM: u32 = 2;

/// Samples produced by one lane per batch iteration.
pub const SAMPLES_PER_ITERATION: u32 = SUBSTREAM_WIDTH * PAIRS_PER_SUBSTREAM;

/// Number of result shards.
pub const SHARD_COUNT: u32 = 1024;

/// Visualization points written per frame.
pub const VIZ_CAPACITY: u32 = 16384;

/// Largest accepted batch size; also the benchmark batch size.
pub const MAX_BATCH_SIZE: u32 = 4096;

/// Batch size used for interactive runs when nothing else is configured.
pub const DEFAULT_BATCH_SIZE: u32 = 64;

/// Floating point operations charged per sample: two bit-constructed
/// subtractions, two squares, one add and one compare.
pub const FLOPS_PER_SAMPLE: u64 = 6;

/// Generator state per lane: four sub-streams of four `u32` words.
pub const LANE_STATE_BYTES: u64 = (SUBSTREAM_WIDTH * 4 * 4) as u64;

/// Per-dimension limit on dispatched workgroups.
pub const MAX_GROUPS_PER_DIMENSION: u32 = 65535;

/// Per-frame parameter block, uploaded as a uniform before each dispatch.
///
/// Field order is part of the kernel interface.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SimParams {
    /// Session seed.
    pub seed: u32,
    /// Monotonic frame counter.
    pub global_time: u32,
    /// Inner-loop iterations per lane.
    pub batch_size: u32,
    /// Reserved.
    pub write_threshold: u32,
}

impl SimParams {
    /// Samples one lane contributes per dispatch with these parameters.
    pub fn samples_per_lane(&self) -> u64 {
        self.batch_size as u64 * SAMPLES_PER_ITERATION as u64
    }
}

/// Two-dimensional workgroup count of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchGeometry {
    /// Groups along x.
    pub groups_x: u32,
    /// Groups along y.
    pub groups_y: u32,
}

impl Default for DispatchGeometry {
    fn default() -> Self {
        // 16 * 8 * 256 = 32768 lanes
        Self {
            groups_x: 16,
            groups_y: 8,
        }
    }
}

impl DispatchGeometry {
    /// Create and validate a geometry.
    pub fn new(groups_x: u32, groups_y: u32) -> Result<Self> {
        let geometry = Self { groups_x, groups_y };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check both dimensions are within dispatch limits and the lane count
    /// fits in 32 bits.
    pub fn validate(&self) -> Result<()> {
        for (axis, groups) in [("x", self.groups_x), ("y", self.groups_y)] {
            if groups == 0 || groups > MAX_GROUPS_PER_DIMENSION {
                return Err(MontePiError::InvalidParameter(format!(
                    "groups_{} must be in 1..={}, got {}",
                    axis, MAX_GROUPS_PER_DIMENSION, groups
                )));
            }
        }
        self.checked_lane_count().ok_or_else(|| {
            MontePiError::InvalidParameter(format!(
                "{}x{} groups of {} lanes exceed {} lanes",
                self.groups_x,
                self.groups_y,
                WORKGROUP_SIZE,
                u32::MAX
            ))
        })?;
        Ok(())
    }

    /// Lane count, or `None` if it does not fit in a `u32`.
    pub fn checked_lane_count(&self) -> Option<u32> {
        self.groups_x
            .checked_mul(self.groups_y)?
            .checked_mul(WORKGROUP_SIZE)
    }

    /// Total groups in one dispatch.
    ///
    /// Saturates on geometries that [`validate`](Self::validate) rejects.
    pub fn group_count(&self) -> u32 {
        self.groups_x.saturating_mul(self.groups_y)
    }

    /// Total lanes in one dispatch.
    ///
    /// Saturates on geometries that [`validate`](Self::validate) rejects.
    pub fn lane_count(&self) -> u32 {
        self.group_count().saturating_mul(WORKGROUP_SIZE)
    }

    /// Bytes of generator state for every lane.
    pub fn rng_state_bytes(&self) -> u64 {
        self.lane_count() as u64 * LANE_STATE_BYTES
    }

    /// Samples produced by one dispatch at `batch_size`.
    pub fn samples_per_dispatch(&self, batch_size: u32) -> u64 {
        self.lane_count() as u64 * batch_size as u64 * SAMPLES_PER_ITERATION as u64
    }

    /// Visualization points written per frame.
    pub fn viz_points(&self) -> u32 {
        self.lane_count().min(VIZ_CAPACITY)
    }
}

/// Per-frame dispatch switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlags {
    /// Hand the visualization buffers to the renderer.
    pub render: bool,
    /// Copy and clear the result buffer for a readback.
    pub readback: bool,
    /// Wait for the submission to retire before returning.
    pub sync: bool,
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self {
            render: true,
            readback: true,
            sync: false,
        }
    }
}

impl FrameFlags {
    /// Dispatch only: no render, no readback, no wait.
    pub const fn headless() -> Self {
        Self {
            render: false,
            readback: false,
            sync: false,
        }
    }
}

/// Reject batch sizes outside `1..=MAX_BATCH_SIZE`.
pub fn validate_batch_size(batch_size: u32) -> Result<u32> {
    if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
        return Err(MontePiError::InvalidParameter(format!(
            "batch_size must be in 1..={}, got {}",
            MAX_BATCH_SIZE, batch_size
        )));
    }
    Ok(batch_size)
}

/// Map a control position in `[0, 1]` to a batch size.
///
/// The mapping is exponential so the low end of the control stays usable:
/// `0.0 -> 1`, `0.5 -> 64`, `1.0 -> MAX_BATCH_SIZE`.
pub fn batch_size_from_slider(position: f64) -> u32 {
    let p = if position.is_nan() {
        0.0
    } else {
        position.clamp(0.0, 1.0)
    };
    let value = (MAX_BATCH_SIZE as f64).powf(p).round() as u32;
    value.clamp(1, MAX_BATCH_SIZE)
}
