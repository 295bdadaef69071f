//! Config command implementation.
//!
//! Generates configuration files in various formats.

use anyhow::Context;
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from("herakles-sampler.yaml"),
    };

    let mut content = render_config(&config, format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles Sampler Configuration
# ==============================
#
# Scheduling
# ----------
# interval_seconds: 60         # Seconds between collection cycles (>= 1)
# proc_root: "/proc"           # Root of the proc filesystem
# state_file: "/var/lib/herakles/sampler-history.json"
#                              # Sampler state kept between restarts
# parallelism: null            # Threads for the process scan (null = auto)
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
#
# Collectors
# ----------
# enable_disk_collector: true     # Sizes and I/O rates per mounted device
# enable_network_collector: true  # Byte and packet rates per interface
# enable_memory_collector: true   # Memory and swap usage
# enable_cpu_collector: true      # Load, CPU time shares, interrupts
# enable_process_collector: true  # Top processes by memory and CPU
#
# Network
# -------
# interface_pattern: "venet|eth"  # Regex of interfaces to report
# network_rate_unit: "second"     # second | minute
# network_round_digits: 2         # Decimal places (0-12)
#
# Processes
# ---------
# top_n: 10                    # Groups selected per ranking
# cpu_normalization: "ticks"   # ticks | wall_clock
# selection_mode: "ranked"     # ranked (top memory + top CPU) | union
# test_data_file: null         # JSON process table instead of /proc
#
"#;
    format!("{}{}", comments, yaml)
}
