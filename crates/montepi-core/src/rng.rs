//! Per-lane generator state.
//!
//! Every lane owns four xoshiro128+ generators (period 2^128 - 1) stored
//! word-interleaved, so `s[w]` holds word `w` of all four sub-streams and
//! maps directly onto a WGSL `vec4<u32>`. A lane is 512 bits. The four
//! sub-streams never share a word.
//!
//! All-zero is the fixed point of the xoshiro transition. Seeding patches any
//! all-zero sub-stream, and the transition is a bijection on the non-zero
//! states, so a patched store stays non-degenerate for the whole run.

use bytemuck::{Pod, Zeroable};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{MontePiError, Result};
use crate::params::SUBSTREAM_WIDTH;

/// Replacement word for an all-zero sub-stream.
const PATCH_CONSTANT: u32 = 0x9E37_79B9;

const WIDTH: usize = SUBSTREAM_WIDTH as usize;

/// Generator state of one lane: four interleaved 128-bit sub-states.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct LaneState {
    /// `s[word][substream]`.
    pub s: [[u32; WIDTH]; 4],
}

impl LaneState {
    /// Whether all 512 bits are zero.
    pub fn is_degenerate(&self) -> bool {
        self.s.iter().all(|word| word.iter().all(|&v| v == 0))
    }

    /// Whether the 128-bit sub-state `k` is zero.
    pub fn substream_is_zero(&self, k: usize) -> bool {
        self.s.iter().all(|word| word[k] == 0)
    }

    /// Advance all four sub-streams one step and return their outputs.
    #[inline]
    pub fn next_u32x4(&mut self) -> [u32; WIDTH] {
        let [s0, s1, s2, s3] = &mut self.s;
        let mut out = [0u32; WIDTH];
        for k in 0..WIDTH {
            out[k] = s0[k].wrapping_add(s3[k]);
            let t = s1[k] << 9;
            s2[k] ^= s0[k];
            s3[k] ^= s1[k];
            s1[k] ^= s2[k];
            s0[k] ^= s3[k];
            s2[k] ^= t;
            s3[k] = s3[k].rotate_left(11);
        }
        out
    }

    /// Advance all four sub-streams and map the outputs to `[0, 1)`.
    #[inline]
    pub fn next_unit_x4(&mut self) -> [f32; WIDTH] {
        self.next_u32x4().map(unit_f32)
    }
}

/// Map 32 random bits to `[0, 1)` by building the float directly.
///
/// The top 23 bits become the mantissa of a value in `[1, 2)`; subtracting
/// one is exact. No division is involved.
#[inline]
pub fn unit_f32(bits: u32) -> f32 {
    f32::from_bits((bits >> 9) | 0x3F80_0000) - 1.0
}

#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Generator state for every lane of a session.
///
/// This is the host image of the device RNG buffer: upload it once, let the
/// kernel advance it in place, and read it back to take a savepoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RngStateStore {
    lanes: Vec<LaneState>,
}

impl RngStateStore {
    /// Seed every lane from operating system entropy.
    pub fn from_entropy(lane_count: u32) -> Self {
        let mut lanes = vec![LaneState::zeroed(); lane_count as usize];
        OsRng.fill_bytes(bytemuck::cast_slice_mut(&mut lanes));
        tracing::debug!(lanes = lane_count, "Seeded lane generators from OS entropy");
        Self::from_lanes(lanes)
    }

    /// Seed every lane deterministically from a 32-bit seed.
    pub fn from_seed(seed: u32, lane_count: u32) -> Self {
        let mut sm = ((seed as u64) << 32) | 0x5EED;
        let mut lanes = vec![LaneState::zeroed(); lane_count as usize];
        for lane in lanes.iter_mut() {
            for word in lane.s.iter_mut() {
                let a = splitmix64(&mut sm);
                let b = splitmix64(&mut sm);
                *word = [a as u32, (a >> 32) as u32, b as u32, (b >> 32) as u32];
            }
        }
        Self::from_lanes(lanes)
    }

    /// Wrap existing lane states, patching any all-zero sub-stream.
    pub fn from_lanes(mut lanes: Vec<LaneState>) -> Self {
        let patched = patch_degenerate(&mut lanes);
        if patched > 0 {
            tracing::warn!(patched, "Patched all-zero generator sub-states");
        }
        Self { lanes }
    }

    /// Restore a store from a device savepoint.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let lane_size = std::mem::size_of::<LaneState>();
        if bytes.is_empty() || bytes.len() % lane_size != 0 {
            return Err(MontePiError::InvalidParameter(format!(
                "RNG savepoint must be a non-empty multiple of {} bytes, got {}",
                lane_size,
                bytes.len()
            )));
        }
        Ok(Self::from_lanes(bytemuck::pod_collect_to_vec(bytes)))
    }

    /// Number of lanes.
    pub fn lane_count(&self) -> u32 {
        self.lanes.len() as u32
    }

    /// Lane states.
    pub fn lanes(&self) -> &[LaneState] {
        &self.lanes
    }

    /// Mutable lane states, for backends that advance them on the host.
    pub fn lanes_mut(&mut self) -> &mut [LaneState] {
        &mut self.lanes
    }

    /// Device upload image.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.lanes)
    }

    /// Size of the device buffer in bytes.
    pub fn byte_len(&self) -> u64 {
        self.as_bytes().len() as u64
    }
}

fn patch_degenerate(lanes: &mut [LaneState]) -> usize {
    let mut patched = 0;
    for (lane_idx, lane) in lanes.iter_mut().enumerate() {
        for k in 0..WIDTH {
            if lane.substream_is_zero(k) {
                let salt = ((lane_idx * WIDTH + k) as u32).wrapping_mul(0x85EB_CA6B);
                lane.s[0][k] = (PATCH_CONSTANT ^ salt) | 1;
                patched += 1;
            }
        }
    }
    patched
}
