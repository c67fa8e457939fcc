//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// depthsync - synchronized frame acquisition for multi-sensor depth cameras
#[derive(Parser, Debug)]
#[command(
    name = "depthsync",
    author,
    version,
    about = "Synchronized frame acquisition for multi-sensor depth cameras",
    long_about = "Drives a depth camera from a device profile, synchronizes its \n\
                  streams into framesets and hands them to consumer threads.\n\n\
                  Without hardware attached the mock UVC transport paces frames \n\
                  at each selected mode's frame rate."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "DEPTHSYNC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "DEPTHSYNC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream framesets to consumer threads
    Run(RunArgs),

    /// Validate a device profile without streaming
    Validate(ValidateArgs),

    /// Display the capability table of a device profile
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to the device profile (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "configs/mock_d4.toml",
        env = "DEPTHSYNC_CONFIG"
    )]
    pub config: PathBuf,

    /// Number of consumer threads
    #[arg(long, default_value = "3", env = "DEPTHSYNC_CONSUMERS")]
    pub consumers: usize,

    /// Stop after this many framesets (0 = unlimited)
    #[arg(long, default_value = "0", env = "DEPTHSYNC_MAX_FRAMESETS")]
    pub max_framesets: u64,

    /// Run timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "DEPTHSYNC_TIMEOUT")]
    pub timeout: u64,

    /// Pending framesets per consumer before new ones are dropped (0 = unbounded)
    #[arg(long, default_value = "8", env = "DEPTHSYNC_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Also start motion tracking
    #[arg(long)]
    pub motion: bool,

    /// Mock IMU sample rate in Hz
    #[arg(long, default_value = "200", env = "DEPTHSYNC_MOTION_RATE")]
    pub motion_rate: f64,

    /// Corrupt every n-th mock frame per sub-device (0 = never)
    #[arg(long, default_value = "0")]
    pub corrupt_every: u64,

    /// Validate the profile and print the selected modes without streaming
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "DEPTHSYNC_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the device profile to validate
    #[arg(short, long, default_value = "configs/mock_d4.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to the device profile
    #[arg(short, long, default_value = "configs/mock_d4.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// List every hardware mode
    #[arg(long)]
    pub modes: bool,

    /// List presets and option ranges
    #[arg(long)]
    pub options: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
