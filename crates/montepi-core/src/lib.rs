//! Backend-independent engine for Monte Carlo estimation of π.
//!
//! Every lane of a dispatch draws points in the unit square from its own
//! generator state and counts how many fall inside the quarter circle.
//! Counts are combined per group and added into sharded 64-bit counters
//! built from 32-bit atomics. `4 * inside / total` converges on π.
//!
//! # Features
//!
//! - **Persistent RNG state**: four xoshiro128+ sub-streams per lane, uploaded
//!   once and advanced in place across frames
//! - **Overflow-safe counting**: carry-on-wrap low/high counter pairs
//! - **Two reduction strategies**: shared-memory tree or subgroup add, with
//!   identical per-shard results
//! - **Benchmark protocol**: wall-clock warm-up and steady-state windows with
//!   a statistical soundness verdict
//! - **CPU mirror**: the device kernel's semantics on the rayon pool
//!
//! # Example
//!
//! ```
//! use montepi_core::prelude::*;
//!
//! let geometry = DispatchGeometry::new(2, 1).unwrap();
//! let mut sampler = CpuSampler::seeded(geometry, 42).unwrap();
//! let params = SimParams { seed: 42, global_time: 0, batch_size: 64, write_threshold: 0 };
//!
//! sampler.dispatch(&params, ReductionStrategy::Workgroup).unwrap();
//! let counts = sampler.counts();
//! assert_eq!(counts.total, 512 * 64 * 8);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod benchmark;
pub mod config;
pub mod cpu;
pub mod error;
pub mod kernel;
pub mod params;
pub mod reduction;
pub mod rng;
pub mod session;
pub mod viz;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::benchmark::{
        BenchmarkAction, BenchmarkConfig, BenchmarkPhase, BenchmarkProtocol, BenchmarkReport,
        FramePlan, SoundnessVerdict,
    };
    pub use crate::config::MontePiConfig;
    pub use crate::cpu::CpuSampler;
    pub use crate::error::{MontePiError, Result};
    pub use crate::params::{
        batch_size_from_slider, DispatchGeometry, FrameFlags, SimParams, MAX_BATCH_SIZE,
        SHARD_COUNT, VIZ_CAPACITY, WORKGROUP_SIZE,
    };
    pub use crate::reduction::{Counts, ReductionPreference, ReductionStrategy, Slot};
    pub use crate::rng::RngStateStore;
    pub use crate::session::{Estimate, SimulationSession};
    pub use crate::viz::VisualizationBuffers;
}

// Re-exports
pub use error::{MontePiError, Result};
pub use reduction::Counts;
