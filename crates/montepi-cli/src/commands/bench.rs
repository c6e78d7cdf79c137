//! `montepi bench` command - Warm-up plus steady-state throughput benchmark.

use colored::Colorize;
use montepi_core::benchmark::{BenchmarkReport, SoundnessVerdict};
use montepi_core::config::MontePiConfig;
use montepi_core::params::MAX_BATCH_SIZE;
use montepi_core::session::SimulationSession;
use montepi_wgpu::run_benchmark;

use super::{create_orchestrator, format_rate, interrupt_flag, load_config, parse_reduction};
use crate::error::CliResult;

/// Options of the `bench` command.
#[derive(Debug, Clone, Default)]
pub struct BenchArgs {
    /// Configuration file.
    pub config: Option<String>,
    /// Warm-up seconds.
    pub warmup: Option<f64>,
    /// Steady-state seconds.
    pub steady: Option<f64>,
    /// Reduction preference.
    pub reduction: Option<String>,
    /// Print the report as JSON.
    pub json: bool,
}

/// Apply command-line overrides to the file configuration.
pub fn resolve_config(args: &BenchArgs) -> CliResult<MontePiConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(warmup) = args.warmup {
        config.benchmark.warmup_secs = warmup;
    }
    if let Some(steady) = args.steady {
        config.benchmark.steady_secs = steady;
    }
    if let Some(reduction) = &args.reduction {
        config.sampler.reduction = parse_reduction(reduction)?;
    }
    config.validate()?;
    Ok(config)
}

/// Execute the `bench` command.
pub async fn execute(args: BenchArgs) -> CliResult<()> {
    let config = resolve_config(&args)?;

    if !args.json {
        println!("{} Running benchmark", "→".bright_cyan());
        println!(
            "  {} Warm-up: {}s, steady state: {}s, batch size {}",
            "•".dimmed(),
            config.benchmark.warmup_secs.to_string().bright_yellow(),
            config.benchmark.steady_secs.to_string().bright_yellow(),
            MAX_BATCH_SIZE
        );
    }

    let mut orchestrator = create_orchestrator(&config).await?;
    let mut session = SimulationSession::new(
        config.sampler.seed.unwrap_or(0),
        config.sampler.batch_size,
        config.benchmark.to_protocol_config(),
    )?;
    let running = interrupt_flag();

    let report = run_benchmark(&mut orchestrator, &mut session, &running).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &BenchmarkReport) {
    println!();
    println!("{}:", "Benchmark Report".bright_white().underline());
    println!();
    println!("  Steady-state time:   {:.3} s", report.steady_time_secs);
    println!("  Samples:             {}", report.steady_samples);
    println!(
        "  Throughput:          {}",
        format_rate(report.samples_per_sec, "samples/s").bright_white()
    );
    println!(
        "  Compute:             {}",
        format_rate(report.flops_per_sec, "FLOP/s")
    );
    println!("  π estimate:          {:.10}", report.pi_estimate);
    println!("  Empirical error:     {:.3e}", report.empirical_error);
    println!("  Theoretical error:   {:.3e}", report.theoretical_error);
    println!("  Error ratio:         {:.3}", report.error_ratio);

    let verdict = match report.verdict {
        SoundnessVerdict::Sound => "sound".bright_green(),
        SoundnessVerdict::Marginal => "marginal".yellow(),
        SoundnessVerdict::Suspect => "suspect".bright_red(),
    };
    println!("  Verdict:             {}", verdict);
}
