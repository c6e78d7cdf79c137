//! WebGPU backend for MontePi.
//!
//! Negotiates an adapter (high-performance, then default, then software),
//! compiles one of two WGSL kernel variants and drives the per-frame
//! dispatch/readback cycle.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::atomic::AtomicBool;
//! use montepi_core::prelude::*;
//! use montepi_wgpu::{GpuContext, Orchestrator, OrchestratorOptions};
//!
//! let context = GpuContext::new().await?;
//! let options = OrchestratorOptions::default();
//! let store = RngStateStore::from_entropy(options.geometry.lane_count());
//! let mut orchestrator = Orchestrator::new(context, &store, options)?;
//! let mut session = SimulationSession::new(0, 64, BenchmarkConfig::default())?;
//!
//! let running = AtomicBool::new(true);
//! let report = montepi_wgpu::run_benchmark(&mut orchestrator, &mut session, &running).await?;
//! println!("{:.0} samples/s", report.samples_per_sec);
//! ```

#![warn(missing_docs)]

pub mod adapter;
pub mod driver;
pub mod memory;
pub mod readback;
pub mod runtime;
pub mod shader;

pub use adapter::{Capabilities, GpuContext};
pub use driver::{run_benchmark, run_interactive, InteractiveOptions, InteractiveSummary};
pub use memory::SamplerBuffers;
pub use readback::{ReadbackSlot, ReadbackState};
pub use runtime::{FrameOutput, Orchestrator, OrchestratorOptions, RenderSink};
pub use shader::SamplerPipeline;

/// Check if any WebGPU adapter can be acquired on this system.
pub fn is_wgpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default())).is_ok()
}
