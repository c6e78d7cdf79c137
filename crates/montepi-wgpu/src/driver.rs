//! Host loops driving an [`Orchestrator`] from a [`SimulationSession`].
//!
//! The interactive loop accumulates readback deltas in the session; the
//! benchmark loop never clears the result buffer and measures the difference
//! between the baseline and the final readback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use montepi_core::benchmark::{BenchmarkAction, BenchmarkReport};
use montepi_core::error::{MontePiError, Result};
use montepi_core::params::FrameFlags;
use montepi_core::session::{Estimate, SimulationSession};

use crate::runtime::Orchestrator;

/// Interactive loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractiveOptions {
    /// Stop after this many frames; `None` runs until `running` is cleared.
    pub frames: Option<u64>,
    /// Per-frame switches.
    pub flags: FrameFlags,
    /// Minimum time between estimate callbacks.
    pub report_interval: Duration,
}

impl Default for InteractiveOptions {
    fn default() -> Self {
        Self {
            frames: None,
            flags: FrameFlags::default(),
            report_interval: Duration::from_millis(500),
        }
    }
}

/// Outcome of an interactive run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractiveSummary {
    /// Frames dispatched.
    pub frames: u64,
    /// Final estimate over every sample of the run.
    pub estimate: Option<Estimate>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// Run frames until `running` is cleared or the frame limit is reached.
///
/// `on_estimate` receives the running estimate at most once per report
/// interval. Before returning, outstanding work is drained so the final
/// estimate covers every dispatched sample.
pub async fn run_interactive<F>(
    orchestrator: &mut Orchestrator,
    session: &mut SimulationSession,
    options: InteractiveOptions,
    running: &AtomicBool,
    mut on_estimate: F,
) -> Result<InteractiveSummary>
where
    F: FnMut(&Estimate),
{
    let started = Instant::now();
    orchestrator.reset()?;
    session.reset_at(started);

    let mut frames = 0u64;
    let mut last_report = started;

    while running.load(Ordering::SeqCst) && options.frames.map_or(true, |limit| frames < limit) {
        let Some(plan) = session.plan_frame(options.flags) else {
            break;
        };
        let params = session.next_params(plan.batch_size);
        let output = orchestrator.frame(&params, plan.flags)?;
        frames += 1;

        if let Some(delta) = output.readback {
            let now = Instant::now();
            if let Some(estimate) = session.record(delta, now) {
                if now.duration_since(last_report) >= options.report_interval {
                    on_estimate(&estimate);
                    last_report = now;
                }
            }
        }

        tokio::task::yield_now().await;
    }

    // Includes any readback still in flight.
    let remainder = orchestrator.read_aggregate_blocking(true)?;
    let estimate = session.record(remainder, Instant::now()).or(session.estimate());

    let summary = InteractiveSummary {
        frames,
        estimate,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        frames,
        samples = session.counts().total,
        elapsed_secs = summary.elapsed.as_secs_f64(),
        "Interactive run finished"
    );
    Ok(summary)
}

/// Run the benchmark protocol to completion.
///
/// The steady window opens when the baseline readback completes and closes
/// after the final `wait_idle`. Drain time of the queued dispatches is part
/// of the window, and so are their samples, so throughput is
/// `(final - baseline) / window`.
///
/// Clearing `running` aborts the run; the session returns to `Idle` either
/// way.
pub async fn run_benchmark(
    orchestrator: &mut Orchestrator,
    session: &mut SimulationSession,
    running: &AtomicBool,
) -> Result<BenchmarkReport> {
    orchestrator.reset()?;
    session.reset();

    let result = drive_benchmark(orchestrator, session, running).await;
    if result.is_err() {
        session.reset();
        if let Err(e) = orchestrator.reset() {
            tracing::warn!(error = %e, "Failed to clear results after benchmark error");
        }
    }
    result
}

async fn drive_benchmark(
    orchestrator: &mut Orchestrator,
    session: &mut SimulationSession,
    running: &AtomicBool,
) -> Result<BenchmarkReport> {
    session.benchmark_mut().start(Instant::now())?;

    loop {
        if !running.load(Ordering::SeqCst) {
            return Err(MontePiError::BenchmarkAborted(
                "interrupted before the measurement window closed".to_string(),
            ));
        }

        match session.benchmark_mut().poll(Instant::now()) {
            BenchmarkAction::Continue => {}
            BenchmarkAction::CaptureBaseline => {
                let baseline = orchestrator.read_aggregate_blocking(false)?;
                session
                    .benchmark_mut()
                    .complete_baseline(baseline, Instant::now())?;
            }
            BenchmarkAction::Finalize => {
                orchestrator.wait_idle()?;
                let now = Instant::now();
                let final_counts = orchestrator.read_aggregate_blocking(false)?;
                let report = session.finish_benchmark(final_counts, now)?;
                orchestrator.reset()?;
                return Ok(report);
            }
        }

        // Benchmark phases ignore the interactive switches.
        let Some(plan) = session.plan_frame(FrameFlags::headless()) else {
            continue;
        };
        let params = session.next_params(plan.batch_size);
        orchestrator.frame(&params, plan.flags)?;

        tokio::task::yield_now().await;
    }
}
