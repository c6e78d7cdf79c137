//! Per-frame orchestration of the sampling kernel.
//!
//! The orchestrator exclusively owns the device context, pipeline and
//! buffers. Each frame uploads parameters, dispatches, optionally hands the
//! visualization buffers to a renderer and optionally encodes a copy+clear of
//! the result buffer into the same command buffer. Command order sequences
//! the copy and clear after the dispatch and before the next one.

use std::collections::VecDeque;

use montepi_core::error::{MontePiError, Result};
use montepi_core::params::{validate_batch_size, DispatchGeometry, FrameFlags, SimParams};
use montepi_core::reduction::{Counts, ReductionPreference, ReductionStrategy};
use montepi_core::rng::RngStateStore;
use montepi_core::viz::VisualizationBuffers;

use crate::adapter::{Capabilities, GpuContext};
use crate::memory::{SamplerBuffers, RESULTS_SIZE};
use crate::readback::{ReadbackSlot, ReadbackState};
use crate::shader::SamplerPipeline;

/// Rendering collaborator.
///
/// Receives the half-precision visualization buffers directly; they carry
/// `VERTEX` usage, so a renderer can bind them as vertex buffers without a
/// copy.
pub trait RenderSink {
    /// Draw `points` points from the x/y arrays.
    fn render(&mut self, viz_x: &wgpu::Buffer, viz_y: &wgpu::Buffer, points: u32);
}

/// Orchestrator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Dispatch geometry, fixed for the session.
    pub geometry: DispatchGeometry,
    /// Reduction strategy preference.
    pub reduction: ReductionPreference,
    /// Outstanding submissions before the host waits on the oldest.
    pub max_frames_in_flight: u32,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            geometry: DispatchGeometry::default(),
            reduction: ReductionPreference::Auto,
            max_frames_in_flight: 3,
        }
    }
}

/// What a frame produced on the host side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOutput {
    /// Counts of an earlier readback window that completed this frame.
    pub readback: Option<Counts>,
    /// Whether this frame encoded a copy+clear.
    pub readback_issued: bool,
}

/// Owner of the device, pipeline and buffers of one session.
pub struct Orchestrator {
    context: GpuContext,
    pipeline: SamplerPipeline,
    buffers: SamplerBuffers,
    bind_group: wgpu::BindGroup,
    geometry: DispatchGeometry,
    readback: ReadbackSlot,
    uncleared: Counts,
    in_flight: VecDeque<wgpu::SubmissionIndex>,
    max_frames_in_flight: usize,
    renderer: Option<Box<dyn RenderSink>>,
}

impl Orchestrator {
    /// Build the pipeline and buffers for a session.
    pub fn new(
        context: GpuContext,
        store: &RngStateStore,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let geometry = options.geometry;
        if options.max_frames_in_flight == 0 {
            return Err(MontePiError::InvalidParameter(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }

        let caps = context.capabilities();
        caps.check_geometry(geometry)?;

        let strategy = caps.select_strategy(options.reduction)?;
        let device = context.device();
        let pipeline = SamplerPipeline::new(device, strategy);
        let buffers = SamplerBuffers::new(device, geometry, store)?;
        let bind_group = pipeline.bind_group(device, &buffers);

        tracing::info!(
            lanes = geometry.lane_count(),
            groups_x = geometry.groups_x,
            groups_y = geometry.groups_y,
            strategy = %strategy,
            "Orchestrator ready"
        );

        Ok(Self {
            context,
            pipeline,
            buffers,
            bind_group,
            geometry,
            readback: ReadbackSlot::new(),
            uncleared: Counts::default(),
            in_flight: VecDeque::new(),
            max_frames_in_flight: options.max_frames_in_flight as usize,
            renderer: None,
        })
    }

    /// Attach a rendering collaborator.
    pub fn set_renderer(&mut self, renderer: Box<dyn RenderSink>) {
        self.renderer = Some(renderer);
    }

    /// Run one frame.
    pub fn frame(&mut self, params: &SimParams, flags: FrameFlags) -> Result<FrameOutput> {
        validate_batch_size(params.batch_size)?;

        let mut output = FrameOutput::default();
        self.context.poll()?;
        if self.readback.poll() == ReadbackState::Ready {
            output.readback = self.readback.take(self.buffers.staging());
        }

        self.apply_backpressure()?;

        self.buffers.write_params(self.context.queue(), params);
        let mut encoder = self
            .context
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("MontePi Frame Encoder"),
            });
        self.encode_dispatch(&mut encoder);

        if flags.readback && self.readback.is_idle() {
            self.encode_copy(&mut encoder, true);
            self.uncleared = Counts::default();
            output.readback_issued = true;
        }

        let index = self.context.queue().submit(Some(encoder.finish()));
        self.in_flight.push_back(index);

        if output.readback_issued {
            self.readback.begin(self.buffers.staging())?;
        }

        if flags.render {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.render(
                    self.buffers.viz_x(),
                    self.buffers.viz_y(),
                    self.buffers.viz_points(),
                );
            }
        }

        if flags.sync {
            self.wait_idle()?;
        }

        tracing::trace!(
            frame = params.global_time,
            batch_size = params.batch_size,
            readback = output.readback_issued,
            in_flight = self.in_flight.len(),
            "Frame submitted"
        );
        Ok(output)
    }

    /// Block until all submitted work has retired.
    pub fn wait_idle(&mut self) -> Result<()> {
        self.context.wait_idle()?;
        self.in_flight.clear();
        Ok(())
    }

    /// Wait for an outstanding readback and return its counts.
    pub fn finish_pending(&mut self) -> Result<Option<Counts>> {
        if self.readback.is_idle() {
            return Ok(None);
        }
        self.wait_idle()?;
        self.readback.poll();
        Ok(self.readback.take(self.buffers.staging()))
    }

    /// Synchronously read the summed result buffer.
    ///
    /// Waits for idle and folds in any outstanding copy+clear readback, so
    /// the result covers every sample not yet returned by a clearing
    /// readback. With `clear` the result buffer is zeroed afterwards.
    ///
    /// On a failed map, a clearing read contributes nothing for the lost
    /// window. A non-clearing read falls back to the last good read of the
    /// uncleared buffer, which never overlaps an earlier clearing readback.
    pub fn read_aggregate_blocking(&mut self, clear: bool) -> Result<Counts> {
        let mut counts = self.finish_pending()?.unwrap_or_default();

        let mut encoder = self
            .context
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("MontePi Readback Encoder"),
            });
        self.encode_copy(&mut encoder, clear);
        self.context.queue().submit(Some(encoder.finish()));

        self.readback.begin(self.buffers.staging())?;
        self.wait_idle()?;
        self.readback.poll();
        let fresh = self.readback.take(self.buffers.staging());

        counts.accumulate(resolve_window(fresh, clear, &mut self.uncleared));
        Ok(counts)
    }

    /// Zero the result buffer and drop any outstanding readback.
    pub fn reset(&mut self) -> Result<()> {
        self.finish_pending()?;
        let mut encoder = self
            .context
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("MontePi Reset Encoder"),
            });
        encoder.clear_buffer(self.buffers.results(), 0, None);
        self.context.queue().submit(Some(encoder.finish()));
        self.wait_idle()?;
        self.uncleared = Counts::default();
        tracing::debug!("Result buffer cleared");
        Ok(())
    }

    /// Replace the generator state (explicit reseed).
    pub fn reseed(&mut self, store: &RngStateStore) -> Result<()> {
        self.wait_idle()?;
        self.buffers.upload_rng(self.context.queue(), store)?;
        tracing::info!(lanes = store.lane_count(), "Generator state reseeded");
        Ok(())
    }

    /// Read the generator state back as a savepoint.
    pub fn savepoint(&mut self) -> Result<RngStateStore> {
        let bytes = self.read_buffer_blocking(self.buffers.rng(), "MontePi RNG Savepoint")?;
        self.in_flight.clear();
        RngStateStore::from_bytes(&bytes)
    }

    /// Read the visualization buffers back to the host.
    pub fn read_viz_blocking(&mut self) -> Result<VisualizationBuffers> {
        let x = self.read_buffer_blocking(self.buffers.viz_x(), "MontePi Viz X Readback")?;
        let y = self.read_buffer_blocking(self.buffers.viz_y(), "MontePi Viz Y Readback")?;
        self.in_flight.clear();
        Ok(VisualizationBuffers::from_device_bytes(&x, &y))
    }

    /// Kernel variant in use.
    pub fn strategy(&self) -> ReductionStrategy {
        self.pipeline.strategy()
    }

    /// Adapter capabilities.
    pub fn capabilities(&self) -> &Capabilities {
        self.context.capabilities()
    }

    /// Dispatch geometry.
    pub fn geometry(&self) -> DispatchGeometry {
        self.geometry
    }

    /// Session buffers.
    pub fn buffers(&self) -> &SamplerBuffers {
        &self.buffers
    }

    /// Readback slot state.
    pub fn readback_state(&self) -> ReadbackState {
        self.readback.state()
    }

    /// Submissions not yet known to have retired.
    pub fn frames_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn encode_dispatch(&self, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("MontePi Sample Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(self.pipeline.pipeline());
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(self.geometry.groups_x, self.geometry.groups_y, 1);
    }

    fn encode_copy(&self, encoder: &mut wgpu::CommandEncoder, clear: bool) {
        encoder.copy_buffer_to_buffer(
            self.buffers.results(),
            0,
            self.buffers.staging(),
            0,
            RESULTS_SIZE,
        );
        if clear {
            encoder.clear_buffer(self.buffers.results(), 0, None);
        }
    }

    fn apply_backpressure(&mut self) -> Result<()> {
        while self.in_flight.len() >= self.max_frames_in_flight {
            let Some(oldest) = self.in_flight.pop_front() else {
                break;
            };
            self.context
                .device()
                .poll(wgpu::PollType::WaitForSubmissionIndex(oldest))
                .map_err(|e| MontePiError::Device(e.to_string()))?;
        }
        Ok(())
    }

    fn read_buffer_blocking(&self, source: &wgpu::Buffer, label: &str) -> Result<Vec<u8>> {
        let device = self.context.device();
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: source.size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, source.size());
        self.context.queue().submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.context.wait_idle()?;

        rx.try_recv()
            .map_err(|e| MontePiError::Readback(format!("{}: callback not run ({})", label, e)))?
            .map_err(|e| MontePiError::Readback(format!("{}: {}", label, e)))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }
}

/// Counts a blocking read contributes, given whether its map succeeded.
///
/// `uncleared` tracks the last good read of the buffer since its last clear.
fn resolve_window(fresh: Option<Counts>, clear: bool, uncleared: &mut Counts) -> Counts {
    match (fresh, clear) {
        (Some(counts), true) => {
            *uncleared = Counts::default();
            counts
        }
        (Some(counts), false) => {
            *uncleared = counts;
            counts
        }
        (None, true) => {
            *uncleared = Counts::default();
            Counts::default()
        }
        (None, false) => *uncleared,
    }
}
