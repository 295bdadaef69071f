//! Network interface statistics collector.
//!
//! Reads `/proc/net/dev` and reports per interface bundle:
//! `bytes_in`, `bytes_out` (KB/s) and `packets_in`, `packets_out` (per
//! second), rounded to 2 digits. Only interfaces matching the configured
//! pattern are reported.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SamplerError};
use crate::platform::Platform;
use crate::sampler::{require_procfs, BundleSource, BundledSampler, RateOptions};

const FAMILY: &str = "network";

/// Interfaces reported when no pattern is configured.
pub const DEFAULT_INTERFACE_PATTERN: &str = "venet|eth";

/// Network interface statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDevStats {
    pub interface: String,
    pub receive_bytes: u64,
    pub receive_packets: u64,
    pub transmit_bytes: u64,
    pub transmit_packets: u64,
}

/// Parse `/proc/net/dev` content, in file order.
pub fn parse_netdev(content: &str) -> Vec<NetDevStats> {
    content
        .lines()
        // Skip the two header lines
        .skip(2)
        .filter_map(|line| {
            let (interface, rest) = line.split_once(':')?;
            let values: Vec<&str> = rest.split_whitespace().collect();
            if values.len() < 10 {
                return None;
            }
            let num = |i: usize| values[i].parse::<u64>().unwrap_or(0);
            Some(NetDevStats {
                interface: interface.trim().to_string(),
                receive_bytes: num(0),
                receive_packets: num(1),
                transmit_bytes: num(8),
                transmit_packets: num(9),
            })
        })
        .collect()
}

/// Read `<root>/net/dev`.
pub fn read_netdev(root: &Path) -> Result<Vec<NetDevStats>> {
    let content = super::read_proc_file(FAMILY, &root.join("net").join("dev"))?;
    Ok(parse_netdev(&content))
}

#[derive(Debug, Clone)]
pub struct NetworkCollector {
    proc_root: PathBuf,
    platform: Platform,
    interfaces: Regex,
    rate: RateOptions,
}

impl NetworkCollector {
    /// Collector for interfaces matching `pattern`.
    pub fn new(proc_root: impl Into<PathBuf>, pattern: &str) -> Result<Self> {
        let interfaces = Regex::new(pattern).map_err(|e| {
            SamplerError::State(format!("invalid interface pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            proc_root: proc_root.into(),
            platform: Platform::current(),
            interfaces,
            rate: RateOptions::per_second().round(2),
        })
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Override the default per-second, 2-digit rates.
    pub fn with_rate(mut self, rate: RateOptions) -> Result<Self> {
        rate.validate()?;
        self.rate = rate;
        Ok(self)
    }
}

impl BundleSource for NetworkCollector {
    fn name(&self) -> &str {
        FAMILY
    }

    fn build_report(&mut self, sampler: &mut BundledSampler) -> Result<()> {
        require_procfs(FAMILY, self.platform)?;
        let stats = read_netdev(&self.proc_root)?;
        let options = self.rate;

        let mut seen = BTreeSet::new();
        for iface in stats.iter().filter(|s| self.interfaces.is_match(&s.interface)) {
            let name = iface.interface.as_str();
            seen.insert(name.to_string());
            sampler.counter(name, "Bytes in", iface.receive_bytes as f64 / 1024.0, options)?;
            sampler.counter(name, "Packets in", iface.receive_packets as f64, options)?;
            sampler.counter(name, "Bytes out", iface.transmit_bytes as f64 / 1024.0, options)?;
            sampler.counter(name, "Packets out", iface.transmit_packets as f64, options)?;
        }

        // Interfaces that went away shouldn't keep baselines forever
        let gone: Vec<String> = sampler
            .bundles()
            .filter(|b| !seen.contains(*b))
            .map(str::to_string)
            .collect();
        for bundle in gone {
            debug!(interface = %bundle, "Interface disappeared, dropping its memory");
            sampler.forget_bundle(&bundle);
        }
        Ok(())
    }
}
