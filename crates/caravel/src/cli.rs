//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Caravel: cross-backend replication workers for S3-compatible object storage.
#[derive(Parser)]
#[command(name = "caravel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start replication workers.
    Run(RunArgs),
    /// Print version information.
    Version,
}

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Replication site to serve (overrides config).
    #[arg(short, long)]
    pub site: Option<String>,

    /// Number of workers to run in this process.
    #[arg(short, long, default_value = "1")]
    pub workers: usize,
}
