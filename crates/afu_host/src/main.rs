mod run;
mod stats;
mod sweep;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Host driver for the line-copy accelerator function.
///
/// Without a subcommand, runs the reference copy test: five input lines on
/// the simulated target at the reference poll interval.
#[derive(Parser)]
#[command(name = "afu-host", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one copy test and verify the output
    Run(run::RunArgs),
    /// Run copy tests for every capacity up to a maximum, in parallel
    Sweep {
        #[arg(long, default_value_t = 16)]
        max_lines: usize,
        /// Poll interval in microseconds
        #[arg(long, default_value_t = 1_000)]
        poll_us: u64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        None => run::run_copy_test(&run::RunArgs::default())?,
        Some(Commands::Run(args)) => run::run_copy_test(&args)?,
        Some(Commands::Sweep { max_lines, poll_us }) => sweep::run_sweep(max_lines, poll_us)?,
    };
    Ok(outcome.exit_code())
}
