//! CLI command implementations.

pub mod bench;
pub mod info;
pub mod run;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use colored::Colorize;
use montepi_core::config::MontePiConfig;
use montepi_core::params::DispatchGeometry;
use montepi_core::reduction::ReductionPreference;
use montepi_core::rng::RngStateStore;
use montepi_wgpu::{GpuContext, Orchestrator, OrchestratorOptions};

use crate::error::{CliError, CliResult};

/// Load the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&str>) -> CliResult<MontePiConfig> {
    match path {
        Some(path) => Ok(MontePiConfig::load(path)?),
        None => Ok(MontePiConfig::default()),
    }
}

/// Parse a `--reduction` value.
pub fn parse_reduction(value: &str) -> CliResult<ReductionPreference> {
    value.parse().map_err(CliError::InvalidArgument)
}

/// Negotiate the device and build the orchestrator for `config`.
pub async fn create_orchestrator(config: &MontePiConfig) -> CliResult<Orchestrator> {
    let geometry: DispatchGeometry = config.sampler.geometry;
    let context = GpuContext::new().await?;
    context.capabilities().check_geometry(geometry)?;

    let store = match config.sampler.seed {
        Some(seed) => RngStateStore::from_seed(seed, geometry.lane_count()),
        None => RngStateStore::from_entropy(geometry.lane_count()),
    };
    let options = OrchestratorOptions {
        geometry,
        reduction: config.sampler.reduction,
        max_frames_in_flight: config.frame.max_frames_in_flight,
    };
    let orchestrator = Orchestrator::new(context, &store, options)?;

    let caps = orchestrator.capabilities();
    println!(
        "  {} Adapter: {} ({:?})",
        "•".dimmed(),
        caps.name.bright_white(),
        caps.backend
    );
    println!(
        "  {} Lanes: {} ({}x{} groups), reduction: {}",
        "•".dimmed(),
        geometry.lane_count().to_string().bright_yellow(),
        geometry.groups_x,
        geometry.groups_y,
        orchestrator.strategy().to_string().bright_yellow()
    );
    Ok(orchestrator)
}

/// Flag cleared on Ctrl-C.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            flag.store(false, Ordering::SeqCst);
        }
    });
    running
}

/// Human-readable rate with an SI prefix.
pub fn format_rate(value: f64, unit: &str) -> String {
    const PREFIXES: [(f64, &str); 4] = [(1e12, "T"), (1e9, "G"), (1e6, "M"), (1e3, "k")];
    for (scale, prefix) in PREFIXES {
        if value >= scale {
            return format!("{:.2} {}{}", value / scale, prefix, unit);
        }
    }
    format!("{:.2} {}", value, unit)
}
