//! Configuration management for herakles-sampler.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use anyhow::{bail, Context};
use herakles_sampler::process::{CpuNormalization, SelectionMode, DEFAULT_TOP_N};
use herakles_sampler::sampler::{RateOptions, RateUnit, MAX_ROUND_DIGITS};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::{Args, ConfigFormat};

// Default configuration constants
pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_STATE_FILE: &str = "/var/lib/herakles/sampler-history.json";
pub const DEFAULT_INTERFACE_PATTERN: &str = herakles_sampler::collectors::netdev::DEFAULT_INTERFACE_PATTERN;
pub const DEFAULT_NETWORK_ROUND_DIGITS: u32 = 2;

/// Sampler configuration. Unset fields fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Scheduling
    #[serde(alias = "interval-seconds")]
    pub interval_seconds: Option<u64>,
    #[serde(alias = "proc-root")]
    pub proc_root: Option<PathBuf>,
    #[serde(alias = "state-file")]
    pub state_file: Option<PathBuf>,
    pub parallelism: Option<usize>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,

    // Collector enable flags
    #[serde(alias = "enable-disk-collector")]
    pub enable_disk_collector: Option<bool>,
    #[serde(alias = "enable-network-collector")]
    pub enable_network_collector: Option<bool>,
    #[serde(alias = "enable-memory-collector")]
    pub enable_memory_collector: Option<bool>,
    #[serde(alias = "enable-cpu-collector")]
    pub enable_cpu_collector: Option<bool>,
    #[serde(alias = "enable-process-collector")]
    pub enable_process_collector: Option<bool>,

    // Network
    /// Regex of interfaces to report
    #[serde(alias = "interface-pattern")]
    pub interface_pattern: Option<String>,
    /// "second" | "minute"
    #[serde(alias = "network-rate-unit")]
    pub network_rate_unit: Option<String>,
    #[serde(alias = "network-round-digits")]
    pub network_round_digits: Option<u32>,

    // Processes
    #[serde(alias = "top-n")]
    pub top_n: Option<usize>,
    /// "ticks" | "wall_clock"
    #[serde(alias = "cpu-normalization")]
    pub cpu_normalization: Option<String>,
    /// "ranked" | "union"
    #[serde(alias = "selection-mode")]
    pub selection_mode: Option<String>,

    /// Path to JSON process table (uses synthetic data instead of /proc)
    #[serde(alias = "test-data-file")]
    pub test_data_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_seconds: Some(DEFAULT_INTERVAL_SECONDS),
            proc_root: Some(PathBuf::from(DEFAULT_PROC_ROOT)),
            state_file: Some(PathBuf::from(DEFAULT_STATE_FILE)),
            parallelism: None,
            log_level: Some("info".into()),
            enable_disk_collector: Some(true),
            enable_network_collector: Some(true),
            enable_memory_collector: Some(true),
            enable_cpu_collector: Some(true),
            enable_process_collector: Some(true),
            interface_pattern: Some(DEFAULT_INTERFACE_PATTERN.into()),
            network_rate_unit: Some("second".into()),
            network_round_digits: Some(DEFAULT_NETWORK_ROUND_DIGITS),
            top_n: Some(DEFAULT_TOP_N),
            cpu_normalization: Some(CpuNormalization::default().to_string()),
            selection_mode: Some("ranked".into()),
            test_data_file: None,
        }
    }
}

impl Config {
    pub fn interval(&self) -> u64 {
        self.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS)
    }

    pub fn proc_root(&self) -> PathBuf {
        self.proc_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT))
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
    }

    pub fn interface_pattern(&self) -> &str {
        self.interface_pattern
            .as_deref()
            .unwrap_or(DEFAULT_INTERFACE_PATTERN)
    }

    pub fn top_n(&self) -> usize {
        self.top_n.unwrap_or(DEFAULT_TOP_N)
    }

    pub fn cpu_normalization(&self) -> anyhow::Result<CpuNormalization> {
        match self.cpu_normalization.as_deref() {
            Some(s) => s.parse().map_err(anyhow::Error::msg),
            None => Ok(CpuNormalization::default()),
        }
    }

    pub fn selection_mode(&self) -> anyhow::Result<SelectionMode> {
        match self.selection_mode.as_deref() {
            Some(s) => s.parse().map_err(anyhow::Error::msg),
            None => Ok(SelectionMode::default()),
        }
    }

    /// Rate options of the network counters.
    pub fn network_rate(&self) -> anyhow::Result<RateOptions> {
        let per = match self.network_rate_unit.as_deref() {
            Some(s) => s.parse::<RateUnit>()?,
            None => RateUnit::Second,
        };
        let rate = RateOptions {
            per,
            round: Some(
                self.network_round_digits
                    .unwrap_or(DEFAULT_NETWORK_ROUND_DIGITS),
            ),
        };
        rate.validate()?;
        Ok(rate)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> anyhow::Result<()> {
    // Collector flags: at least one must be true
    let enabled = [
        cfg.enable_disk_collector,
        cfg.enable_network_collector,
        cfg.enable_memory_collector,
        cfg.enable_cpu_collector,
        cfg.enable_process_collector,
    ];
    if !enabled.iter().any(|flag| flag.unwrap_or(true)) {
        bail!("At least one collector must be enabled");
    }

    if cfg.interval() < 1 {
        bail!("interval_seconds must be at least 1, got {}", cfg.interval());
    }

    if cfg.top_n() < 1 {
        bail!("top_n must be at least 1");
    }

    if let Some(digits) = cfg.network_round_digits {
        if digits > MAX_ROUND_DIGITS {
            bail!(
                "network_round_digits must be at most {}, got {}",
                MAX_ROUND_DIGITS,
                digits
            );
        }
    }
    cfg.network_rate().context("Invalid network rate options")?;

    Regex::new(cfg.interface_pattern()).with_context(|| {
        format!("Invalid interface_pattern '{}'", cfg.interface_pattern())
    })?;

    cfg.cpu_normalization()
        .context("Invalid cpu_normalization")?;
    cfg.selection_mode().context("Invalid selection_mode")?;

    if let Some(path) = &cfg.test_data_file {
        if !path.exists() {
            bail!("Test data file not found: {}", path.display());
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(interval) = args.interval {
        config.interval_seconds = Some(interval);
    }
    if let Some(root) = &args.proc_root {
        config.proc_root = Some(root.clone());
    }
    if let Some(state_file) = &args.state_file {
        config.state_file = Some(state_file.clone());
    }
    if let Some(n) = args.top_n {
        config.top_n = Some(n);
    }
    if let Some(pattern) = &args.interface_pattern {
        config.interface_pattern = Some(pattern.clone());
    }
    if let Some(parallelism) = args.parallelism {
        config.parallelism = Some(parallelism);
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(format!("{:?}", level).to_lowercase());
    }

    // Test data file: CLI wins if provided
    if let Some(test_file) = &args.test_data_file {
        config.test_data_file = Some(test_file.clone());
    }

    Ok(config)
}

/// Configuration loading with multiple format support
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            // Try default locations
            let defaults = [
                "/etc/herakles/sampler.yaml",
                "/etc/herakles/sampler.yml",
                "/etc/herakles/sampler.json",
                "/etc/herakles/sampler.toml",
                "./herakles-sampler.yaml",
                "./herakles-sampler.yml",
                "./herakles-sampler.json",
                "./herakles-sampler.toml",
            ];

            match defaults.iter().find(|p| Path::new(p).exists()) {
                Some(found) => PathBuf::from(found),
                None => return Ok(Config::default()),
            }
        }
    };

    if !path.exists() {
        bail!("Config file not found: {}", path.display());
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            config
        }
        Some("toml") => {
            let config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            config
        }
        _ => {
            // Default to YAML
            let config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            config
        }
    };
    Ok(config)
}

/// Render configuration in the requested format
pub fn render_config(config: &Config, format: ConfigFormat) -> anyhow::Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> anyhow::Result<()> {
    println!("{}", render_config(config, format)?);
    Ok(())
}
