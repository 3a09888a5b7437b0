//! cnbridge - v2 buildpack shim for the v3 lifecycle
//!
//! CLI entry point that dispatches to the phase subcommands.

use clap::Parser;
use cnbridge::cli::{Cli, Commands};
use cnbridge::error::ShimResult;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ShimResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info (phase progress), 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("cnbridge=warn"),
        1 => EnvFilter::new("cnbridge=info"),
        _ => EnvFilter::new("cnbridge=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Commands::Supply(args) => cnbridge::cli::commands::supply(args).await,
        Commands::Detect(args) => cnbridge::cli::commands::detect(args).await,
        Commands::Finalize(args) => cnbridge::cli::commands::finalize(args).await,
        Commands::Release(args) => cnbridge::cli::commands::release(args).await,
    }
}
