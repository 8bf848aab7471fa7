//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific
//! modules.

mod datasets_cmd;
mod run_cmd;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::load_settings;

#[derive(Parser)]
#[command(name = "regharvest")]
#[command(about = "Resumable drug-registration data harvesting")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output root directory (overrides config file)
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start or resume a harvesting run
    Run {
        /// Resume a previous run by id, or "latest"
        #[arg(short, long)]
        resume: Option<String>,

        /// Comma-separated dataset keys (defaults to all configured)
        #[arg(short, long)]
        datasets: Option<String>,

        /// Disable the progress display (log lines only)
        #[arg(long)]
        no_progress: bool,
    },

    /// Show a run's progress and totals
    Status {
        /// Run id (defaults to the most recent run)
        run_id: Option<String>,
    },

    /// List runs under the output root
    Runs,

    /// List configured datasets
    Datasets,
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref());
    if let Some(output_dir) = cli.output_dir {
        settings.output_root = output_dir;
    }

    match cli.command {
        Commands::Run {
            resume,
            datasets,
            no_progress,
        } => run_cmd::cmd_run(&settings, resume, datasets, no_progress).await,
        Commands::Status { run_id } => status::cmd_status(&settings, run_id),
        Commands::Runs => status::cmd_runs(&settings),
        Commands::Datasets => datasets_cmd::cmd_datasets(&settings),
    }
}
