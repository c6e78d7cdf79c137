//! TOML configuration.
//!
//! ```toml
//! [sampler]
//! seed = 42
//! batch_size = 64
//! reduction = "auto"
//!
//! [sampler.geometry]
//! groups_x = 16
//! groups_y = 8
//!
//! [frame]
//! render = true
//! readback = true
//! sync = false
//! max_frames_in_flight = 3
//! report_interval_ms = 500
//!
//! [benchmark]
//! warmup_secs = 10.0
//! steady_secs = 10.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::benchmark::BenchmarkConfig;
use crate::error::{MontePiError, Result};
use crate::params::{
    validate_batch_size, DispatchGeometry, FrameFlags, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE,
};
use crate::reduction::ReductionPreference;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MontePiConfig {
    /// Sampler settings.
    #[serde(default)]
    pub sampler: SamplerConfig,

    /// Per-frame settings.
    #[serde(default)]
    pub frame: FrameConfig,

    /// Benchmark durations.
    #[serde(default)]
    pub benchmark: BenchmarkSettings,
}

/// Sampler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Fixed seed; entropy seeding when absent.
    #[serde(default)]
    pub seed: Option<u32>,

    /// Interactive batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Dispatch geometry.
    #[serde(default)]
    pub geometry: DispatchGeometry,

    /// Reduction strategy preference.
    #[serde(default)]
    pub reduction: ReductionPreference,
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            seed: None,
            batch_size: default_batch_size(),
            geometry: DispatchGeometry::default(),
            reduction: ReductionPreference::default(),
        }
    }
}

/// Per-frame settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Hand visualization buffers to a renderer each frame.
    #[serde(default = "default_true")]
    pub render: bool,

    /// Read back the result buffer when the staging slot is free.
    #[serde(default = "default_true")]
    pub readback: bool,

    /// Wait for every submission to retire.
    #[serde(default)]
    pub sync: bool,

    /// Outstanding submissions before the host waits.
    #[serde(default = "default_max_frames_in_flight")]
    pub max_frames_in_flight: u32,

    /// Interval between running-estimate reports in milliseconds.
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_frames_in_flight() -> u32 {
    3
}

fn default_report_interval() -> u64 {
    500
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            render: true,
            readback: true,
            sync: false,
            max_frames_in_flight: default_max_frames_in_flight(),
            report_interval_ms: default_report_interval(),
        }
    }
}

impl FrameConfig {
    /// Interactive frame switches.
    pub fn flags(&self) -> FrameFlags {
        FrameFlags {
            render: self.render,
            readback: self.readback,
            sync: self.sync,
        }
    }

    /// Report interval as a duration.
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

/// Benchmark durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSettings {
    /// Warm-up duration.
    #[serde(default = "default_phase_secs")]
    pub warmup_secs: f64,

    /// Steady-state duration.
    #[serde(default = "default_phase_secs")]
    pub steady_secs: f64,
}

fn default_phase_secs() -> f64 {
    10.0
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            warmup_secs: default_phase_secs(),
            steady_secs: default_phase_secs(),
        }
    }
}

impl BenchmarkSettings {
    /// Protocol durations. Call after [`MontePiConfig::validate`].
    pub fn to_protocol_config(&self) -> BenchmarkConfig {
        BenchmarkConfig {
            warmup: Duration::from_secs_f64(self.warmup_secs.max(0.0)),
            steady: Duration::from_secs_f64(self.steady_secs.max(0.0)),
        }
    }
}

impl MontePiConfig {
    /// Parse from TOML text and validate.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Check every range.
    pub fn validate(&self) -> Result<()> {
        validate_batch_size(self.sampler.batch_size).map_err(|_| {
            MontePiError::InvalidConfig(format!(
                "sampler.batch_size must be in 1..={}, got {}",
                MAX_BATCH_SIZE, self.sampler.batch_size
            ))
        })?;
        self.sampler
            .geometry
            .validate()
            .map_err(|e| MontePiError::InvalidConfig(format!("sampler.geometry: {}", e)))?;

        if self.frame.max_frames_in_flight == 0 {
            return Err(MontePiError::InvalidConfig(
                "frame.max_frames_in_flight must be at least 1".to_string(),
            ));
        }

        for (name, secs) in [
            ("benchmark.warmup_secs", self.benchmark.warmup_secs),
            ("benchmark.steady_secs", self.benchmark.steady_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(MontePiError::InvalidConfig(format!(
                    "{} must be a positive number of seconds, got {}",
                    name, secs
                )));
            }
        }
        Ok(())
    }
}
