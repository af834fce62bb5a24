//! Arguments for the geotrack subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// `geotrack run`
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Seconds between captures (overrides `tracker.update_interval_secs`)
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,
}

/// `geotrack once`
#[derive(Debug, Args)]
pub struct OnceCommand {
    /// Print the captured sample as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// `geotrack status`
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Print status as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// `geotrack history`
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Restrict to one session identifier
    #[arg(short, long, value_name = "ID")]
    pub session: Option<String>,

    /// Restrict to the session of this login
    #[arg(long, conflicts_with = "session")]
    pub current: bool,

    /// Number of samples to show, newest first
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    /// How to print the samples
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// `geotrack config ...`
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show {
        /// Print as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print where the configuration file is read from
    Path,

    /// Check a configuration file for errors
    Validate {
        /// File to check (defaults to the standard location)
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

/// Rendering of sample listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One line per sample
    Plain,
    /// Aligned columns with a header
    #[default]
    Table,
    /// A JSON array
    Json,
}
