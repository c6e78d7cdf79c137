//! Two-phase timed benchmark protocol.
//!
//! `Idle -> WarmUp -> SteadyState -> Finalizing -> Idle`. The protocol is a
//! pure state machine: callers pass in the current [`Instant`] and act on the
//! returned [`BenchmarkAction`]. Phase boundaries are wall-clock durations,
//! never frame or sample counts.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{MontePiError, Result};
use crate::params::{FrameFlags, FLOPS_PER_SAMPLE, MAX_BATCH_SIZE};
use crate::reduction::Counts;

/// Benchmark phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BenchmarkPhase {
    /// Interactive mode.
    Idle,
    /// Saturating the device; nothing is measured.
    WarmUp,
    /// Measurement window.
    SteadyState,
    /// Draining submitted work before the final readback.
    Finalizing,
}

impl BenchmarkPhase {
    /// Phase name for logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkPhase::Idle => "Idle",
            BenchmarkPhase::WarmUp => "WarmUp",
            BenchmarkPhase::SteadyState => "SteadyState",
            BenchmarkPhase::Finalizing => "Finalizing",
        }
    }
}

impl std::fmt::Display for BenchmarkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkConfig {
    /// Warm-up window.
    pub warmup: Duration,
    /// Measurement window.
    pub steady: Duration,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(10),
            steady: Duration::from_secs(10),
        }
    }
}

/// What the driver must do after [`BenchmarkProtocol::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkAction {
    /// Keep dispatching with the current frame plan.
    Continue,
    /// Warm-up is over: read back a baseline and call
    /// [`BenchmarkProtocol::complete_baseline`].
    CaptureBaseline,
    /// Measurement is over: stop dispatching, wait for idle, read back and
    /// call [`BenchmarkProtocol::finalize`].
    Finalize,
}

/// Batch size and switches for the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePlan {
    /// Batch size to dispatch with.
    pub batch_size: u32,
    /// Per-frame switches.
    pub flags: FrameFlags,
}

/// Statistical soundness classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoundnessVerdict {
    /// Error within three standard errors.
    Sound,
    /// Error within five standard errors.
    Marginal,
    /// Error larger than five standard errors.
    Suspect,
}

impl SoundnessVerdict {
    /// Classify an `empirical / theoretical` error ratio.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio <= 3.0 {
            SoundnessVerdict::Sound
        } else if ratio <= 5.0 {
            SoundnessVerdict::Marginal
        } else {
            SoundnessVerdict::Suspect
        }
    }
}

impl std::fmt::Display for SoundnessVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SoundnessVerdict::Sound => "sound",
            SoundnessVerdict::Marginal => "marginal",
            SoundnessVerdict::Suspect => "suspect",
        };
        f.write_str(s)
    }
}

/// Result of a completed measurement window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Measured steady-state time in seconds.
    pub steady_time_secs: f64,
    /// Samples counted in the window.
    pub steady_samples: u64,
    /// Samples inside the quarter circle in the window.
    pub steady_inside: u64,
    /// Throughput.
    pub samples_per_sec: f64,
    /// Derived floating point throughput.
    pub flops_per_sec: f64,
    /// Estimate from the window's counts.
    pub pi_estimate: f64,
    /// `|pi_estimate - pi|`.
    pub empirical_error: f64,
    /// `1 / sqrt(steady_samples)`.
    pub theoretical_error: f64,
    /// `empirical_error / theoretical_error`.
    pub error_ratio: f64,
    /// Soundness classification of `error_ratio`.
    pub verdict: SoundnessVerdict,
}

impl BenchmarkReport {
    /// Compute the report for a window, or `None` if it holds no samples.
    pub fn from_window(window: Counts, elapsed: Duration) -> Option<Self> {
        let steady_time_secs = elapsed.as_secs_f64();
        if steady_time_secs <= 0.0 {
            return None;
        }
        let pi_estimate = window.pi_estimate()?;
        let empirical_error = (pi_estimate - std::f64::consts::PI).abs();
        let theoretical_error = 1.0 / (window.total as f64).sqrt();
        let error_ratio = empirical_error / theoretical_error;
        let samples_per_sec = window.total as f64 / steady_time_secs;

        Some(Self {
            steady_time_secs,
            steady_samples: window.total,
            steady_inside: window.inside,
            samples_per_sec,
            flops_per_sec: samples_per_sec * FLOPS_PER_SAMPLE as f64,
            pi_estimate,
            empirical_error,
            theoretical_error,
            error_ratio,
            verdict: SoundnessVerdict::from_ratio(error_ratio),
        })
    }
}

/// Benchmark state machine.
#[derive(Debug, Clone)]
pub struct BenchmarkProtocol {
    config: BenchmarkConfig,
    phase: BenchmarkPhase,
    transitioning: bool,
    warmup_started: Option<Instant>,
    steady_started: Option<Instant>,
    baseline: Option<Counts>,
}

impl Default for BenchmarkProtocol {
    fn default() -> Self {
        Self::new(BenchmarkConfig::default())
    }
}

impl BenchmarkProtocol {
    /// Idle protocol with the given durations.
    pub fn new(config: BenchmarkConfig) -> Self {
        Self {
            config,
            phase: BenchmarkPhase::Idle,
            transitioning: false,
            warmup_started: None,
            steady_started: None,
            baseline: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> BenchmarkPhase {
        self.phase
    }

    /// Phase durations.
    pub fn config(&self) -> BenchmarkConfig {
        self.config
    }

    /// Whether a benchmark is in progress (interactive controls disabled).
    pub fn is_running(&self) -> bool {
        self.phase != BenchmarkPhase::Idle
    }

    /// Whether the baseline capture is outstanding.
    pub fn is_transitioning(&self) -> bool {
        self.transitioning
    }

    /// Baseline captured at the end of warm-up.
    pub fn baseline(&self) -> Option<Counts> {
        self.baseline
    }

    /// Begin warm-up.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        self.expect_phase(BenchmarkPhase::Idle)?;
        self.phase = BenchmarkPhase::WarmUp;
        self.warmup_started = Some(now);
        tracing::info!(
            warmup_secs = self.config.warmup.as_secs_f64(),
            steady_secs = self.config.steady.as_secs_f64(),
            "Benchmark warm-up started"
        );
        Ok(())
    }

    /// Advance on the wall clock.
    ///
    /// `CaptureBaseline` is returned once per run; polls made while the
    /// baseline capture is outstanding return `Continue`.
    pub fn poll(&mut self, now: Instant) -> BenchmarkAction {
        match self.phase {
            BenchmarkPhase::WarmUp => {
                if self.transitioning {
                    return BenchmarkAction::Continue;
                }
                if elapsed_since(self.warmup_started, now) >= self.config.warmup {
                    self.transitioning = true;
                    tracing::debug!("Warm-up elapsed, capturing baseline");
                    return BenchmarkAction::CaptureBaseline;
                }
                BenchmarkAction::Continue
            }
            BenchmarkPhase::SteadyState => {
                if elapsed_since(self.steady_started, now) >= self.config.steady {
                    self.phase = BenchmarkPhase::Finalizing;
                    tracing::debug!("Steady state elapsed, finalizing");
                    return BenchmarkAction::Finalize;
                }
                BenchmarkAction::Continue
            }
            BenchmarkPhase::Idle | BenchmarkPhase::Finalizing => BenchmarkAction::Continue,
        }
    }

    /// Record the baseline and open the measurement window at `now`.
    pub fn complete_baseline(&mut self, baseline: Counts, now: Instant) -> Result<()> {
        self.expect_phase(BenchmarkPhase::WarmUp)?;
        if !self.transitioning {
            return Err(MontePiError::InvalidPhase {
                expected: "WarmUp (baseline requested)",
                actual: self.phase.as_str(),
            });
        }
        self.baseline = Some(baseline);
        self.steady_started = Some(now);
        self.transitioning = false;
        self.phase = BenchmarkPhase::SteadyState;
        tracing::info!(
            baseline_total = baseline.total,
            baseline_inside = baseline.inside,
            "Steady-state measurement started"
        );
        Ok(())
    }

    /// Plan the next frame, or `None` while finalizing.
    pub fn frame_plan(&self, interactive: FrameFlags, interactive_batch: u32) -> Option<FramePlan> {
        match self.phase {
            BenchmarkPhase::Idle => Some(FramePlan {
                batch_size: interactive_batch,
                flags: interactive,
            }),
            BenchmarkPhase::WarmUp | BenchmarkPhase::SteadyState => Some(FramePlan {
                batch_size: MAX_BATCH_SIZE,
                flags: FrameFlags::headless(),
            }),
            BenchmarkPhase::Finalizing => None,
        }
    }

    /// Turn the final readback into a report and return to `Idle`.
    ///
    /// A window with no samples aborts the run instead of reporting.
    pub fn finalize(&mut self, final_counts: Counts, now: Instant) -> Result<BenchmarkReport> {
        self.expect_phase(BenchmarkPhase::Finalizing)?;
        let baseline = self.baseline.unwrap_or_default();
        let elapsed = elapsed_since(self.steady_started, now);
        self.reset();

        let window = final_counts.since(&baseline).ok_or_else(|| {
            MontePiError::BenchmarkAborted(format!(
                "final count {} is behind baseline {}",
                final_counts.total, baseline.total
            ))
        })?;
        let report = BenchmarkReport::from_window(window, elapsed).ok_or_else(|| {
            MontePiError::BenchmarkAborted("steady-state window produced no samples".to_string())
        })?;

        tracing::info!(
            samples = report.steady_samples,
            samples_per_sec = report.samples_per_sec,
            error_ratio = report.error_ratio,
            verdict = %report.verdict,
            "Benchmark finished"
        );
        Ok(report)
    }

    /// Drop any run in progress.
    pub fn reset(&mut self) {
        if self.phase != BenchmarkPhase::Idle {
            tracing::debug!(phase = %self.phase, "Benchmark reset");
        }
        self.phase = BenchmarkPhase::Idle;
        self.transitioning = false;
        self.warmup_started = None;
        self.steady_started = None;
        self.baseline = None;
    }

    fn expect_phase(&self, expected: BenchmarkPhase) -> Result<()> {
        if self.phase != expected {
            return Err(MontePiError::InvalidPhase {
                expected: expected.as_str(),
                actual: self.phase.as_str(),
            });
        }
        Ok(())
    }
}

fn elapsed_since(start: Option<Instant>, now: Instant) -> Duration {
    start.map_or(Duration::ZERO, |s| now.saturating_duration_since(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> BenchmarkProtocol {
        BenchmarkProtocol::new(BenchmarkConfig {
            warmup: Duration::from_secs(10),
            steady: Duration::from_secs(10),
        })
    }

    fn run_to_finalizing(p: &mut BenchmarkProtocol, t0: Instant, baseline: Counts) {
        p.start(t0).unwrap();
        assert_eq!(p.poll(t0 + Duration::from_secs(10)), BenchmarkAction::CaptureBaseline);
        p.complete_baseline(baseline, t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(p.poll(t0 + Duration::from_secs(20)), BenchmarkAction::Finalize);
    }

    #[test]
    fn test_full_cycle() {
        let mut p = protocol();
        let t0 = Instant::now();
        assert_eq!(p.phase(), BenchmarkPhase::Idle);

        p.start(t0).unwrap();
        assert_eq!(p.phase(), BenchmarkPhase::WarmUp);
        assert_eq!(p.poll(t0 + Duration::from_secs(5)), BenchmarkAction::Continue);

        assert_eq!(p.poll(t0 + Duration::from_secs(10)), BenchmarkAction::CaptureBaseline);
        assert!(p.is_transitioning());
        p.complete_baseline(Counts::new(100, 200), t0 + Duration::from_secs(11))
            .unwrap();
        assert_eq!(p.phase(), BenchmarkPhase::SteadyState);

        assert_eq!(p.poll(t0 + Duration::from_secs(20)), BenchmarkAction::Continue);
        assert_eq!(p.poll(t0 + Duration::from_secs(21)), BenchmarkAction::Finalize);
        assert_eq!(p.phase(), BenchmarkPhase::Finalizing);

        let final_counts = Counts::new(100 + 785_398_163, 200 + 1_000_000_000);
        let report = p.finalize(final_counts, t0 + Duration::from_secs(21)).unwrap();
        assert_eq!(p.phase(), BenchmarkPhase::Idle);
        assert_eq!(report.steady_samples, 1_000_000_000);
        assert!((report.steady_time_secs - 10.0).abs() < 1e-9);
        assert!((report.samples_per_sec - 1.0e8).abs() < 1e-3);
        assert!((report.flops_per_sec - 6.0e8).abs() < 1e-2);
        assert!((report.theoretical_error - 1.0 / 1.0e9f64.sqrt()).abs() < 1e-15);
    }

    #[test]
    fn test_baseline_transition_fires_once() {
        let mut p = protocol();
        let t0 = Instant::now();
        p.start(t0).unwrap();
        let late = t0 + Duration::from_secs(12);
        assert_eq!(p.poll(late), BenchmarkAction::CaptureBaseline);
        for _ in 0..5 {
            assert_eq!(p.poll(late), BenchmarkAction::Continue);
        }
        assert_eq!(p.phase(), BenchmarkPhase::WarmUp);
    }

    #[test]
    fn test_complete_baseline_requires_request() {
        let mut p = protocol();
        let t0 = Instant::now();
        assert!(p.complete_baseline(Counts::default(), t0).is_err());
        p.start(t0).unwrap();
        assert!(p.complete_baseline(Counts::default(), t0).is_err());
    }

    #[test]
    fn test_start_only_from_idle() {
        let mut p = protocol();
        let t0 = Instant::now();
        p.start(t0).unwrap();
        let err = p.start(t0).unwrap_err();
        assert!(matches!(
            err,
            MontePiError::InvalidPhase {
                expected: "Idle",
                actual: "WarmUp"
            }
        ));
    }

    #[test]
    fn test_frame_plans() {
        let mut p = protocol();
        let interactive = FrameFlags::default();
        let plan = p.frame_plan(interactive, 64).unwrap();
        assert_eq!(plan.batch_size, 64);
        assert_eq!(plan.flags, interactive);

        let t0 = Instant::now();
        p.start(t0).unwrap();
        let plan = p.frame_plan(interactive, 64).unwrap();
        assert_eq!(plan.batch_size, MAX_BATCH_SIZE);
        assert_eq!(plan.flags, FrameFlags::headless());

        p.poll(t0 + Duration::from_secs(10));
        p.complete_baseline(Counts::default(), t0 + Duration::from_secs(10))
            .unwrap();
        assert!(!p.frame_plan(interactive, 64).unwrap().flags.readback);

        p.poll(t0 + Duration::from_secs(30));
        assert!(p.frame_plan(interactive, 64).is_none());
    }

    #[test]
    fn test_zero_sample_window_aborts() {
        let mut p = protocol();
        let t0 = Instant::now();
        run_to_finalizing(&mut p, t0, Counts::new(50, 100));

        let err = p.finalize(Counts::new(50, 100), t0 + Duration::from_secs(20));
        assert!(matches!(err, Err(MontePiError::BenchmarkAborted(_))));
        assert_eq!(p.phase(), BenchmarkPhase::Idle);
        assert!(p.baseline().is_none());
    }

    #[test]
    fn test_final_behind_baseline_aborts() {
        let mut p = protocol();
        let t0 = Instant::now();
        run_to_finalizing(&mut p, t0, Counts::new(50, 100));

        let err = p.finalize(Counts::new(10, 20), t0 + Duration::from_secs(20));
        assert!(matches!(err, Err(MontePiError::BenchmarkAborted(_))));
        assert_eq!(p.phase(), BenchmarkPhase::Idle);
    }

    #[test]
    fn test_reset_from_any_phase() {
        let mut p = protocol();
        let t0 = Instant::now();
        p.reset();
        assert_eq!(p.phase(), BenchmarkPhase::Idle);

        p.start(t0).unwrap();
        p.poll(t0 + Duration::from_secs(10));
        p.reset();
        assert_eq!(p.phase(), BenchmarkPhase::Idle);
        assert!(!p.is_transitioning());
        p.start(t0).unwrap();
    }

    #[test]
    fn test_verdicts() {
        assert_eq!(SoundnessVerdict::from_ratio(0.0), SoundnessVerdict::Sound);
        assert_eq!(SoundnessVerdict::from_ratio(3.0), SoundnessVerdict::Sound);
        assert_eq!(SoundnessVerdict::from_ratio(4.2), SoundnessVerdict::Marginal);
        assert_eq!(SoundnessVerdict::from_ratio(5.01), SoundnessVerdict::Suspect);
    }

    #[test]
    fn test_report_serializes() {
        let report =
            BenchmarkReport::from_window(Counts::new(3, 4), Duration::from_secs(1)).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"verdict\":\"Sound\""));
        assert!(BenchmarkReport::from_window(Counts::new(3, 4), Duration::ZERO).is_none());
    }
}
