//! Per-run simulation state.
//!
//! Frame counter, accumulated counts and benchmark phase live here and only
//! here. A run constructs one session; [`SimulationSession::reset`] returns it
//! to a fresh state.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::benchmark::{BenchmarkConfig, BenchmarkProtocol, BenchmarkReport, FramePlan};
use crate::error::Result;
use crate::params::{validate_batch_size, FrameFlags, SimParams};
use crate::reduction::Counts;

/// Running estimate shown to the user after each readback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// `4 * inside / total`.
    pub pi: f64,
    /// `|pi - PI|`.
    pub empirical_error: f64,
    /// Samples accumulated since the last reset.
    pub samples: u64,
    /// Samples per second since the last reset.
    pub samples_per_sec: f64,
}

/// State of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulationSession {
    seed: u32,
    frame: u32,
    batch_size: u32,
    counts: Counts,
    estimate: Option<Estimate>,
    window_start: Instant,
    benchmark: BenchmarkProtocol,
}

impl SimulationSession {
    /// Fresh session.
    pub fn new(seed: u32, batch_size: u32, benchmark: BenchmarkConfig) -> Result<Self> {
        Ok(Self {
            seed,
            frame: 0,
            batch_size: validate_batch_size(batch_size)?,
            counts: Counts::default(),
            estimate: None,
            window_start: Instant::now(),
            benchmark: BenchmarkProtocol::new(benchmark),
        })
    }

    /// Zero the accumulators and frame counter and drop any benchmark run.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    /// [`reset`](Self::reset) with an explicit throughput window start.
    pub fn reset_at(&mut self, now: Instant) {
        self.frame = 0;
        self.counts = Counts::default();
        self.estimate = None;
        self.window_start = now;
        self.benchmark.reset();
    }

    /// Parameter block for the next dispatch.
    pub fn next_params(&mut self, batch_size: u32) -> SimParams {
        let params = SimParams {
            seed: self.seed,
            global_time: self.frame,
            batch_size,
            write_threshold: 0,
        };
        self.frame = self.frame.wrapping_add(1);
        params
    }

    /// Plan the next frame from the benchmark phase and interactive settings.
    pub fn plan_frame(&self, interactive: FrameFlags) -> Option<FramePlan> {
        self.benchmark.frame_plan(interactive, self.batch_size)
    }

    /// Fold an interactive readback delta into the running totals.
    pub fn record(&mut self, delta: Counts, now: Instant) -> Option<Estimate> {
        self.counts.accumulate(delta);
        let pi = self.counts.pi_estimate()?;
        let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
        let estimate = Estimate {
            pi,
            empirical_error: (pi - std::f64::consts::PI).abs(),
            samples: self.counts.total,
            samples_per_sec: if elapsed > 0.0 {
                self.counts.total as f64 / elapsed
            } else {
                0.0
            },
        };
        self.estimate = Some(estimate);
        Some(estimate)
    }

    /// Finish a benchmark run from its final readback and reset the session.
    ///
    /// The interactive batch size is kept, so the next frame plan restores it.
    pub fn finish_benchmark(&mut self, final_counts: Counts, now: Instant) -> Result<BenchmarkReport> {
        let result = self.benchmark.finalize(final_counts, now);
        self.reset_at(now);
        result
    }

    /// Change the interactive batch size.
    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<()> {
        self.batch_size = validate_batch_size(batch_size)?;
        Ok(())
    }

    /// Change the seed carried in the parameter block.
    pub fn set_seed(&mut self, seed: u32) {
        self.seed = seed;
    }

    /// Session seed.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Frames dispatched since the last reset.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Interactive batch size.
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Counts accumulated since the last reset.
    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// Latest running estimate.
    pub fn estimate(&self) -> Option<Estimate> {
        self.estimate
    }

    /// Benchmark state machine.
    pub fn benchmark(&self) -> &BenchmarkProtocol {
        &self.benchmark
    }

    /// Mutable benchmark state machine.
    pub fn benchmark_mut(&mut self) -> &mut BenchmarkProtocol {
        &mut self.benchmark
    }
}
