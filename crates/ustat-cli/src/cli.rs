//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Passive editor usage tracker.
///
/// Reads activity events from the editor as JSON lines, keeps session and
/// lifetime counters, and persists the totals to a JSON file.
#[derive(Debug, Parser)]
#[command(name = "ustat", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Track activity events read from stdin until EOF or ctrl-c.
    Watch {
        /// Print a one-line summary to stderr whenever the counters change.
        #[arg(long)]
        live: bool,
    },

    /// Show stored usage totals.
    Status {
        /// Output the raw stored totals as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Probe git and OS state once and print it as JSON.
    Probe,

    /// Stop showing "not a git repository" notices.
    MuteGitWarning,
}
