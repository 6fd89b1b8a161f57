//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// tcsync - synchronized acquisitions over a tree of time controllers
#[derive(Parser, Debug)]
#[command(
    name = "tcsync",
    author,
    version,
    about = "Synchronized multi-device time-controller acquisitions",
    long_about = "Connects to a tree of time controllers, configures the shared start signal \n\
                  and the trigger delays, records timestamps and histograms through the \n\
                  bulk-transfer service, and merges streamed sub-acquisitions."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TCSYNC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "TCSYNC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Append plain-text logs to this file
    #[arg(long, global = true, env = "TCSYNC_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", global = true, env = "TCSYNC_METRICS_PORT")]
    pub metrics_port: u16,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configure every device and run acquisitions
    Run(RunArgs),

    /// Validate a configuration file without connecting
    Validate(ValidateArgs),

    /// Display the layout and the planned trigger delays
    Info(InfoArgs),

    /// Stream and merge sub-acquisitions of one device
    Stream(StreamArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, default_value = "config.json", env = "TCSYNC_CONFIG")]
    pub config: PathBuf,

    /// Directory of the bulk-transfer service, started locally when unreachable
    #[arg(long, env = "TCSYNC_DLT_DIR")]
    pub dlt_dir: Option<PathBuf>,

    /// Output directory of timestamps and histograms
    #[arg(short, long, default_value = "output", env = "TCSYNC_OUTPUT")]
    pub output: PathBuf,

    /// Acquisition duration in seconds
    #[arg(short, long, default_value = "1.0", env = "TCSYNC_DURATION")]
    pub duration: f64,

    /// Number of acquisitions, written to <output>/<i>/ when greater than 1
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Validate the configuration and exit without connecting
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show the acquisitions of each device
    #[arg(long)]
    pub acquisitions: bool,
}

/// Arguments for the `stream` command
#[derive(Parser, Debug, Clone)]
pub struct StreamArgs {
    /// Instrument address
    #[arg(short, long, env = "TCSYNC_ADDRESS")]
    pub address: String,

    /// Host of the bulk-transfer service
    #[arg(long, default_value = "127.0.0.1", env = "TCSYNC_DLT_HOST")]
    pub dlt_host: String,

    /// Directory of the bulk-transfer service, started locally when unreachable
    #[arg(long, env = "TCSYNC_DLT_DIR")]
    pub dlt_dir: Option<PathBuf>,

    /// Raw channels to stream
    #[arg(long, value_delimiter = ',', default_value = "1,2,3,4")]
    pub channels: Vec<u8>,

    /// Total duration in seconds
    #[arg(short, long, default_value = "3.0")]
    pub duration: f64,

    /// Sub-acquisition duration in seconds
    #[arg(long, default_value = "1.0")]
    pub sub_duration: f64,

    /// Merge an index with the channels available after this many seconds
    #[arg(long)]
    pub partial_after: Option<f64>,

    /// Merged output file
    #[arg(short, long, default_value = "merged_timestamps.txt")]
    pub output_file: PathBuf,

    /// Feed every channel from the internal generators
    #[arg(long)]
    pub demo: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
