//! `montepi run` command - Interactive estimation loop.

use colored::Colorize;
use montepi_core::config::MontePiConfig;
use montepi_core::params::batch_size_from_slider;
use montepi_core::session::SimulationSession;
use montepi_wgpu::{run_interactive, InteractiveOptions};

use super::{create_orchestrator, format_rate, interrupt_flag, load_config, parse_reduction};
use crate::error::{CliError, CliResult};

/// Options of the `run` command.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Configuration file.
    pub config: Option<String>,
    /// Fixed seed.
    pub seed: Option<u32>,
    /// Batch size.
    pub batch_size: Option<u32>,
    /// Control position in `[0, 1]`, mapped to a batch size.
    pub slider: Option<f64>,
    /// Frame limit.
    pub frames: Option<u64>,
    /// Disable per-frame readback.
    pub no_readback: bool,
    /// Wait for every frame.
    pub sync: bool,
    /// Reduction preference.
    pub reduction: Option<String>,
}

/// Apply command-line overrides to the file configuration.
pub fn resolve_config(args: &RunArgs) -> CliResult<MontePiConfig> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(seed) = args.seed {
        config.sampler.seed = Some(seed);
    }
    match (args.batch_size, args.slider) {
        (Some(_), Some(_)) => {
            return Err(CliError::InvalidArgument(
                "--batch-size and --slider are mutually exclusive".to_string(),
            ))
        }
        (Some(batch_size), None) => config.sampler.batch_size = batch_size,
        (None, Some(position)) => config.sampler.batch_size = batch_size_from_slider(position),
        (None, None) => {}
    }
    if args.no_readback {
        config.frame.readback = false;
    }
    if args.sync {
        config.frame.sync = true;
    }
    if let Some(reduction) = &args.reduction {
        config.sampler.reduction = parse_reduction(reduction)?;
    }

    config.validate()?;
    Ok(config)
}

/// Execute the `run` command.
pub async fn execute(args: RunArgs) -> CliResult<()> {
    let config = resolve_config(&args)?;

    println!("{} Starting interactive run", "→".bright_cyan());
    println!(
        "  {} Batch size: {}",
        "•".dimmed(),
        config.sampler.batch_size.to_string().bright_yellow()
    );
    let mut orchestrator = create_orchestrator(&config).await?;
    let mut session = SimulationSession::new(
        config.sampler.seed.unwrap_or(0),
        config.sampler.batch_size,
        config.benchmark.to_protocol_config(),
    )?;
    println!();

    if !config.frame.readback {
        println!(
            "{} Readback disabled, the estimate is only read at the end",
            "Warning:".yellow()
        );
    }

    let running = interrupt_flag();
    let options = InteractiveOptions {
        frames: args.frames,
        flags: config.frame.flags(),
        report_interval: config.frame.report_interval(),
    };

    let summary = run_interactive(&mut orchestrator, &mut session, options, &running, |est| {
        println!(
            "  π ≈ {:.8}  err {:.2e}  samples {:>16}  {}",
            est.pi,
            est.empirical_error,
            est.samples,
            format_rate(est.samples_per_sec, "samples/s").dimmed()
        );
    })
    .await?;

    println!();
    match summary.estimate {
        Some(est) => {
            println!("{}:", "Result".bright_white().underline());
            println!(
                "  {} π estimate: {}",
                "•".dimmed(),
                format!("{:.10}", est.pi).bright_green()
            );
            println!("  {} Empirical error: {:.3e}", "•".dimmed(), est.empirical_error);
            println!("  {} Samples: {}", "•".dimmed(), est.samples);
            println!(
                "  {} Frames: {} in {:.2}s",
                "•".dimmed(),
                summary.frames,
                summary.elapsed.as_secs_f64()
            );
        }
        None => println!("{} No samples were drawn", "Warning:".yellow()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use montepi_core::params::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
    use montepi_core::reduction::ReductionPreference;

    #[test]
    fn test_defaults_without_overrides() {
        let config = resolve_config(&RunArgs::default()).unwrap();
        assert_eq!(config.sampler.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.frame.readback);
        assert_eq!(config.sampler.reduction, ReductionPreference::Auto);
    }

    #[test]
    fn test_overrides_apply() {
        let args = RunArgs {
            seed: Some(9),
            slider: Some(1.0),
            no_readback: true,
            sync: true,
            reduction: Some("workgroup".to_string()),
            ..Default::default()
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.sampler.seed, Some(9));
        assert_eq!(config.sampler.batch_size, MAX_BATCH_SIZE);
        assert!(!config.frame.readback);
        assert!(config.frame.sync);
        assert_eq!(config.sampler.reduction, ReductionPreference::Workgroup);
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let both = RunArgs {
            batch_size: Some(8),
            slider: Some(0.5),
            ..Default::default()
        };
        assert!(matches!(resolve_config(&both), Err(CliError::InvalidArgument(_))));

        let too_big = RunArgs {
            batch_size: Some(MAX_BATCH_SIZE + 1),
            ..Default::default()
        };
        assert!(resolve_config(&too_big).is_err());
    }
}
