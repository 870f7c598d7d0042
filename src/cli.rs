use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "postforge")]
#[command(author, version, about = "Batch publishing automation for locally authored content")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the publishing pipeline
    Run {
        /// Validate and report intended stages without mutating anything
        #[arg(long)]
        dry_run: bool,

        /// Run the retry classifier before the pipeline
        #[arg(long)]
        retry: bool,
    },

    /// Reset errored records to the status they should resume from
    Retry,

    /// Database backup/compaction and report sweep instead of the pipeline
    Maintenance,

    /// Show counts per status per kind
    Stats,

    /// Validate a configuration file
    Validate {
        /// Config file to validate (uses default locations if not specified)
        config: Option<PathBuf>,
    },
}
