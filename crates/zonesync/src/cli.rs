//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// ZoneSync: replicates object-storage data from a remote source zone into
/// the local zone.
#[derive(Parser)]
#[command(name = "zonesync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the replication daemon.
    Run(RunArgs),
    /// Print the persisted sync status for the source zone.
    Status(RunArgs),
    /// Initialize sync status without entering the sync loop.
    InitStatus(RunArgs),
    /// Print version information.
    Version,
}

/// Arguments shared by the daemon commands.
#[derive(Args)]
pub struct RunArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Source zone name (overrides config).
    #[arg(long)]
    pub source_zone: Option<String>,

    /// Source zone endpoint URL (overrides config).
    #[arg(long)]
    pub endpoint: Option<String>,
}
