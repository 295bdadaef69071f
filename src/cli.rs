//! CLI arguments and subcommands for herakles-sampler.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Output format for configuration and reports
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-sampler",
    about = "Host metrics sampler turning raw /proc counters into rates and process rankings",
    long_about = "Host metrics sampler turning raw /proc counters into rates and process rankings.\n\n\
                  Runs the disk, network, memory, CPU and process collectors once per interval, \
                  prints every report as JSON and keeps the sampler state in a history file so \
                  rates continue across restarts.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level (overrides config)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Seconds between collection cycles
    #[arg(short = 'i', long)]
    pub interval: Option<u64>,

    /// Root of the proc filesystem
    #[arg(long)]
    pub proc_root: Option<PathBuf>,

    /// History file holding sampler state between runs
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Neither read nor write the history file
    #[arg(long)]
    pub no_state: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Number of process groups to select
    #[arg(long)]
    pub top_n: Option<usize>,

    /// Regex of network interfaces to report
    #[arg(long)]
    pub interface_pattern: Option<String>,

    /// Parallel processing threads (0 = auto)
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Path to JSON process table (uses synthetic data instead of /proc)
    #[arg(short = 't', long)]
    pub test_data_file: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and system requirements
    Check {
        /// Check /proc filesystem
        #[arg(long)]
        proc: bool,

        /// Check all system requirements
        #[arg(long)]
        all: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Run the collectors a few times and print their reports
    Test {
        /// Number of test iterations
        #[arg(short = 'n', long, default_value_t = 2)]
        iterations: usize,

        /// Seconds to wait between iterations
        #[arg(long, default_value_t = 1)]
        delay: u64,

        /// Print timing and error details
        #[arg(long)]
        verbose: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: ConfigFormat,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let args = Args::parse_from([
            "herakles-sampler",
            "--interval",
            "30",
            "--once",
            "--no-state",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.interval, Some(30));
        assert!(args.once);
        assert!(args.no_state);
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(args.command.is_none());
    }

    #[test]
    fn test_parse_test_subcommand() {
        let args = Args::parse_from(["herakles-sampler", "test", "-n", "3", "--delay", "0"]);
        match args.command {
            Some(Commands::Test {
                iterations, delay, ..
            }) => {
                assert_eq!(iterations, 3);
                assert_eq!(delay, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_log_level_from_config_string() {
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
