//! Device buffers of a sampling session.

use wgpu::util::DeviceExt;

use montepi_core::error::{MontePiError, Result};
use montepi_core::params::{DispatchGeometry, SimParams, SHARD_COUNT};
use montepi_core::reduction::Slot;
use montepi_core::rng::RngStateStore;
use montepi_core::viz::viz_buffer_size;

/// Size of the result buffer in bytes.
pub const RESULTS_SIZE: u64 = SHARD_COUNT as u64 * std::mem::size_of::<Slot>() as u64;

/// Every buffer the kernel binds, plus the readback staging buffer.
///
/// Sizes are fixed for the session: changing the lane count means building a
/// new set.
pub struct SamplerBuffers {
    params: wgpu::Buffer,
    rng: wgpu::Buffer,
    results: wgpu::Buffer,
    viz_x: wgpu::Buffer,
    viz_y: wgpu::Buffer,
    staging: wgpu::Buffer,
    lane_count: u32,
}

impl SamplerBuffers {
    /// Allocate buffers for `geometry` and upload the generator state.
    pub fn new(
        device: &wgpu::Device,
        geometry: DispatchGeometry,
        store: &RngStateStore,
    ) -> Result<Self> {
        let lane_count = geometry.lane_count();
        check_lane_count(lane_count, store)?;

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("MontePi Params"),
            size: std::mem::size_of::<SimParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let rng = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("MontePi RNG State"),
            contents: store.as_bytes(),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });

        // wgpu zero-initializes new buffers.
        let results = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("MontePi Results"),
            size: RESULTS_SIZE,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let viz_size = viz_buffer_size(lane_count);
        let viz_buffer = |label: &'static str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: viz_size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let viz_x = viz_buffer("MontePi Viz X");
        let viz_y = viz_buffer("MontePi Viz Y");

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("MontePi Results Staging"),
            size: RESULTS_SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        tracing::debug!(
            lanes = lane_count,
            rng_bytes = store.byte_len(),
            viz_bytes = viz_size,
            "Allocated sampler buffers"
        );

        Ok(Self {
            params,
            rng,
            results,
            viz_x,
            viz_y,
            staging,
            lane_count,
        })
    }

    /// Upload the parameter block for the next dispatch.
    pub fn write_params(&self, queue: &wgpu::Queue, params: &SimParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
    }

    /// Replace the generator state.
    pub fn upload_rng(&self, queue: &wgpu::Queue, store: &RngStateStore) -> Result<()> {
        check_lane_count(self.lane_count, store)?;
        queue.write_buffer(&self.rng, 0, store.as_bytes());
        Ok(())
    }

    /// Lanes the buffers were sized for.
    pub fn lane_count(&self) -> u32 {
        self.lane_count
    }

    /// Visualization points per array.
    pub fn viz_points(&self) -> u32 {
        (self.viz_x.size() / 2) as u32
    }

    /// Parameter uniform.
    pub fn params(&self) -> &wgpu::Buffer {
        &self.params
    }

    /// Generator state.
    pub fn rng(&self) -> &wgpu::Buffer {
        &self.rng
    }

    /// Result shards.
    pub fn results(&self) -> &wgpu::Buffer {
        &self.results
    }

    /// Visualization x coordinates (f16, vertex-bindable).
    pub fn viz_x(&self) -> &wgpu::Buffer {
        &self.viz_x
    }

    /// Visualization y coordinates (f16, vertex-bindable).
    pub fn viz_y(&self) -> &wgpu::Buffer {
        &self.viz_y
    }

    /// Host-mappable copy of the result shards.
    pub fn staging(&self) -> &wgpu::Buffer {
        &self.staging
    }
}

fn check_lane_count(lane_count: u32, store: &RngStateStore) -> Result<()> {
    if store.lane_count() != lane_count {
        return Err(MontePiError::InvalidParameter(format!(
            "RNG store has {} lanes, buffers hold {}",
            store.lane_count(),
            lane_count
        )));
    }
    Ok(())
}
