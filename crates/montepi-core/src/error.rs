//! Error types for the MontePi engine.

use thiserror::Error;

/// Result type for MontePi operations.
pub type Result<T> = std::result::Result<T, MontePiError>;

/// Errors raised by the sampling engine and its backends.
///
/// Counter wraparound is deliberately absent: carries are folded into the
/// high words and never surface as a fault.
#[derive(Error, Debug)]
pub enum MontePiError {
    /// Every step of the adapter fallback sequence failed.
    #[error(
        "No GPU adapter could be acquired after {attempts} attempts (high-performance, default, software). \
         Another process or a previous session may still hold the device: close it and retry"
    )]
    NoAdapter {
        /// Number of adapter requests that were made.
        attempts: usize,
    },

    /// A feature the memory layout depends on is not available.
    #[error("Required GPU capability missing: {0}")]
    MissingFeature(String),

    /// The adapter refused to create a device.
    #[error("Failed to create device: {0}")]
    DeviceRequest(String),

    /// The device failed while waiting for submitted work.
    #[error("GPU device error: {0}")]
    Device(String),

    /// A parameter is outside its accepted range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Mapping the staging buffer failed.
    #[error("Readback failed: {0}")]
    Readback(String),

    /// A benchmark window produced no usable samples.
    #[error("Benchmark aborted: {0}")]
    BenchmarkAborted(String),

    /// An operation was requested in the wrong benchmark phase.
    #[error("Invalid benchmark phase: expected {expected}, found {actual}")]
    InvalidPhase {
        /// Phase the operation requires.
        expected: &'static str,
        /// Phase the protocol was in.
        actual: &'static str,
    },

    /// IO error while loading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl MontePiError {
    /// Whether the error ends the session (as opposed to a recoverable frame-level issue).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MontePiError::Readback(_) | MontePiError::BenchmarkAborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_adapter_message_is_actionable() {
        let err = MontePiError::NoAdapter { attempts: 3 };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("previous session"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(!MontePiError::Readback("map".into()).is_fatal());
        assert!(!MontePiError::BenchmarkAborted("empty".into()).is_fatal());
        assert!(MontePiError::MissingFeature("SHADER_F16".into()).is_fatal());
    }
}
