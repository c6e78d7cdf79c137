//! Half-precision visualization sink.
//!
//! One point per lane for the first `VIZ_CAPACITY` lanes, overwritten every
//! frame. Nothing in the statistical path reads it.

use half::f16;

use crate::params::VIZ_CAPACITY;

/// Parallel x/y arrays of half-precision coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationBuffers {
    x: Vec<f16>,
    y: Vec<f16>,
}

impl VisualizationBuffers {
    /// Zeroed buffers sized for `lane_count` lanes, capped at `VIZ_CAPACITY`.
    pub fn new(lane_count: u32) -> Self {
        let len = lane_count.min(VIZ_CAPACITY) as usize;
        Self {
            x: vec![f16::ZERO; len],
            y: vec![f16::ZERO; len],
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Whether the sink holds no points.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Store a lane's point; lanes past capacity are ignored.
    ///
    /// Returns whether the point was stored.
    pub fn write(&mut self, lane: u32, point: (f32, f32)) -> bool {
        let idx = lane as usize;
        if idx >= self.x.len() {
            return false;
        }
        self.x[idx] = f16::from_f32(point.0);
        self.y[idx] = f16::from_f32(point.1);
        true
    }

    /// Point at `lane`, widened back to f32.
    pub fn point(&self, lane: usize) -> Option<(f32, f32)> {
        Some((self.x.get(lane)?.to_f32(), self.y.get(lane)?.to_f32()))
    }

    /// All points, widened to f32.
    pub fn points(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.x
            .iter()
            .zip(&self.y)
            .map(|(x, y)| (x.to_f32(), y.to_f32()))
    }

    /// Rebuild from the raw bytes of the device x and y buffers.
    pub fn from_device_bytes(x: &[u8], y: &[u8]) -> Self {
        Self {
            x: bytemuck::pod_collect_to_vec(x),
            y: bytemuck::pod_collect_to_vec(y),
        }
    }

    /// Raw bytes of the x array (device layout).
    pub fn x_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.x)
    }

    /// Raw bytes of the y array (device layout).
    pub fn y_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.y)
    }
}

/// Bytes of one visualization array for a session with `lane_count` lanes.
pub fn viz_buffer_size(lane_count: u32) -> u64 {
    lane_count.min(VIZ_CAPACITY) as u64 * std::mem::size_of::<f16>() as u64
}
