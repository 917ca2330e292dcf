//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sinkline - write message batches to caches, Redis, and stdout
#[derive(Parser, Debug)]
#[command(
    name = "sinkline",
    author,
    version,
    about = "Batched output dispatch pipeline",
    long_about = "Reads newline-delimited messages, groups them into batches, and writes\n\
                  every batch to the outputs declared in the configuration file."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "SINKLINE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "SINKLINE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dispatch pipeline
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "sinkline.toml", env = "SINKLINE_CONFIG")]
    pub config: PathBuf,

    /// Message source, one message per line ("-" for stdin)
    #[arg(short, long, default_value = "-", env = "SINKLINE_INPUT")]
    pub input: String,

    /// Messages per batch
    #[arg(long, default_value = "1", env = "SINKLINE_BATCH_SIZE", value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: u64,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "SINKLINE_METRICS_PORT")]
    pub metrics_port: u16,

    /// Default write deadline in milliseconds for outputs without one (0 = none)
    #[arg(long, default_value = "0", env = "SINKLINE_WRITE_TIMEOUT_MS")]
    pub write_timeout_ms: u64,

    /// Pending batches per output before reading pauses
    #[arg(long, default_value = "64", env = "SINKLINE_QUEUE_CAPACITY")]
    pub queue_capacity: usize,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "sinkline.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "sinkline.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["sinkline", "run", "-c", "pipeline.toml"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.config, PathBuf::from("pipeline.toml"));
        assert_eq!(args.input, "-");
        assert_eq!(args.batch_size, 1);
        assert_eq!(args.write_timeout_ms, 0);
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "sinkline",
            "validate",
            "--json",
            "-vv",
            "--log-format",
            "compact",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Compact));
        assert!(matches!(cli.command, Commands::Validate(ValidateArgs { json: true, .. })));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(Cli::try_parse_from(["sinkline", "run", "--batch-size", "0"]).is_err());
        assert!(Cli::try_parse_from(["sinkline", "-q", "-v", "info"]).is_err());
    }
}
