//! `spikeqc` entry point.
//!
//! Runs the curation pipelines against one sorter output directory and
//! prints the run summary as JSON on stdout. Logs go to stderr, filtered
//! through `RUST_LOG` (default `info`).
//!
//! ## Exit codes
//!
//! - 0: pipeline completed
//! - 2: required inputs not available, nothing written
//! - 1: any other error

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spikeqc_curation::{CurationConfig, CurationEngine, ExecutionSummary};
use tracing_subscriber::EnvFilter;

const EXIT_NOT_AVAILABLE: u8 = 2;

/// Cluster quality metrics and heuristic curation for spike-sorting output
#[derive(Debug, Parser)]
#[command(name = "spikeqc", version)]
struct Cli {
    /// Config file (defaults to `$SPIKEQC_CONFIG`, then `~/.config/spikeqc/spikeqc.toml`)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compute and persist quality metrics, then demote contaminated clusters
    Metrics(DirArgs),

    /// Apply the pre-curation noise and mua filters to the newest metrics
    Filter(DirArgs),

    /// Print the path the next metric table would be written to
    Resolve(DirArgs),
}

#[derive(Debug, clap::Args)]
struct DirArgs {
    /// Sorter output directory
    #[arg(value_name = "SORTER_DIR")]
    sorter_dir: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "spikeqc failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let cfg = match &cli.config {
        Some(path) => CurationConfig::load_from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CurationConfig::load().context("loading config")?,
    };
    let engine = CurationEngine::with_config(cfg);

    match cli.command {
        Command::Metrics(args) => {
            let summary = engine.quality_metrics(&args.sorter_dir)?;
            report(&summary)
        }
        Command::Filter(args) => {
            let summary = engine.prephy_filters(&args.sorter_dir)?;
            report(&summary)
        }
        Command::Resolve(args) => {
            let next = engine.next_metrics_version(&args.sorter_dir)?;
            emit(&serde_json::to_string_pretty(&next)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report(summary: &ExecutionSummary) -> Result<ExitCode> {
    emit(&summary.to_json_pretty()?);
    if summary.is_completed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_NOT_AVAILABLE))
    }
}

#[allow(clippy::print_stdout)]
fn emit(json: &str) {
    println!("{json}");
}
