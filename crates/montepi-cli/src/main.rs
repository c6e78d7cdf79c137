//! MontePi CLI - GPU Monte Carlo estimation of π and throughput benchmark.
//!
//! # Commands
//!
//! - `montepi info` - Show the negotiated adapter and its capabilities
//! - `montepi run` - Run the interactive estimation loop
//! - `montepi bench` - Run the warm-up/steady-state benchmark
//! - `montepi completions <shell>` - Print shell completions
//!
//! # Examples
//!
//! ```bash
//! # Estimate until Ctrl-C with a fixed seed
//! montepi run --seed 42
//!
//! # 1000 frames at the largest batch size
//! montepi run --slider 1.0 --frames 1000
//!
//! # Short benchmark with a JSON report
//! montepi bench --warmup 2 --steady 5 --json
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use commands::bench::BenchArgs;
use commands::run::RunArgs;
use commands::{bench, info, run};

/// MontePi CLI - massively parallel Monte Carlo π on WebGPU
#[derive(Parser)]
#[command(name = "montepi")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the selected adapter, its features and the reduction strategy
    Info,

    /// Run the interactive estimation loop
    Run {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<String>,

        /// Seed for reproducible generator state (default: OS entropy)
        #[arg(short, long)]
        seed: Option<u32>,

        /// Iterations per lane per frame (1..=4096)
        #[arg(short, long)]
        batch_size: Option<u32>,

        /// Batch size as a control position in [0, 1], mapped exponentially
        #[arg(long)]
        slider: Option<f64>,

        /// Stop after this many frames
        #[arg(short, long)]
        frames: Option<u64>,

        /// Do not read back results while running
        #[arg(long)]
        no_readback: bool,

        /// Wait for every frame to complete
        #[arg(long)]
        sync: bool,

        /// Reduction strategy (auto, workgroup, subgroup)
        #[arg(short, long)]
        reduction: Option<String>,
    },

    /// Run the warm-up plus steady-state benchmark
    Bench {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<String>,

        /// Warm-up duration in seconds
        #[arg(long)]
        warmup: Option<f64>,

        /// Steady-state duration in seconds
        #[arg(long)]
        steady: Option<f64>,

        /// Reduction strategy (auto, workgroup, subgroup)
        #[arg(short, long)]
        reduction: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn print_banner() {
    println!(
        "  {} {}\n",
        "MontePi: Monte Carlo π on the GPU".bright_cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let json_output = matches!(cli.command, Commands::Bench { json: true, .. });
    if !cli.quiet && !json_output && !matches!(cli.command, Commands::Completions { .. }) {
        print_banner();
    }

    let result = match cli.command {
        Commands::Info => info::execute().await,

        Commands::Run {
            config,
            seed,
            batch_size,
            slider,
            frames,
            no_readback,
            sync,
            reduction,
        } => {
            run::execute(RunArgs {
                config,
                seed,
                batch_size,
                slider,
                frames,
                no_readback,
                sync,
                reduction,
            })
            .await
        }

        Commands::Bench {
            config,
            warmup,
            steady,
            reduction,
            json,
        } => {
            bench::execute(BenchArgs {
                config,
                warmup,
                steady,
                reduction,
                json,
            })
            .await
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "montepi", &mut std::io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
