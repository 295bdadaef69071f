//! Memory collector backed by `/proc/meminfo`.
//!
//! Values are reported in whole MB. Free memory includes buffers and page
//! cache. `swap_used_percent` is omitted on hosts without swap.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Result, SamplerError};
use crate::platform::Platform;
use crate::sampler::{require_procfs, MetricSource, Sampler};

const FAMILY: &str = "memory";

/// Parse `/proc/meminfo` into field name → kB.
pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
    content
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}

/// Memory figures in MB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySummary {
    pub size: u64,
    pub used: u64,
    pub avail: u64,
    pub used_percent: Option<u64>,
    pub swap_size: u64,
    pub swap_used: u64,
    pub swap_used_percent: Option<u64>,
}

impl MemorySummary {
    pub fn from_meminfo(info: &HashMap<String, u64>) -> Self {
        let kb = |key: &str| info.get(key).copied().unwrap_or(0);

        let total = kb("MemTotal") / 1024;
        let free = (kb("MemFree") + kb("Buffers") + kb("Cached")) / 1024;
        let used = total.saturating_sub(free);

        let swap_total = kb("SwapTotal") / 1024;
        let swap_free = kb("SwapFree") / 1024;
        let swap_used = swap_total.saturating_sub(swap_free);

        let percent = |part: u64, whole: u64| {
            (whole > 0).then(|| (part as f64 / whole as f64 * 100.0) as u64)
        };

        Self {
            size: total,
            used,
            avail: total - used,
            used_percent: percent(used, total),
            swap_size: swap_total,
            swap_used,
            swap_used_percent: percent(swap_used, swap_total),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryCollector {
    proc_root: PathBuf,
    platform: Platform,
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl MemoryCollector {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            platform: Platform::current(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }
}

impl MetricSource for MemoryCollector {
    fn name(&self) -> &str {
        FAMILY
    }

    fn build_report(&mut self, sampler: &mut Sampler) -> Result<()> {
        require_procfs(FAMILY, self.platform)?;
        let content = super::read_proc_file(FAMILY, &self.proc_root.join("meminfo"))?;
        let info = parse_meminfo(&content);
        if info.is_empty() {
            return Err(SamplerError::unavailable(FAMILY, "meminfo has no fields"));
        }

        let summary = MemorySummary::from_meminfo(&info);
        sampler.report([
            ("size", summary.size),
            ("used", summary.used),
            ("avail", summary.avail),
            ("swap_size", summary.swap_size),
            ("swap_used", summary.swap_used),
        ]);
        if let Some(percent) = summary.used_percent {
            sampler.report_value("used_percent", percent);
        }
        if let Some(percent) = summary.swap_used_percent {
            sampler.report_value("swap_used_percent", percent);
        }
        Ok(())
    }
}
