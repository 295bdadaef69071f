//! CPU collector backed by `/proc/stat` and `/proc/loadavg`.
//!
//! Utilization is the share of each CPU time class over all CPU time since
//! the last run, so the first run only reports load averages and gauges.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::error::{Result, SamplerError};
use crate::platform::Platform;
use crate::sampler::{require_procfs, round_to, MetricSource, RateOptions, Sampler};

const FAMILY: &str = "cpu";

/// Aggregate `cpu` line of `/proc/stat`, in ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    /// Calculate total CPU time (all fields).
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

/// Host-wide figures from `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatSummary {
    pub cpu: CpuStat,
    pub interrupts: Option<u64>,
    pub context_switches: Option<u64>,
    pub procs_running: Option<u64>,
    pub procs_blocked: Option<u64>,
}

/// Parse `/proc/stat` content.
pub fn parse_stat(content: &str) -> std::result::Result<StatSummary, String> {
    let mut summary = StatSummary::default();
    let mut found_cpu = false;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&key, values)) = parts.split_first() else {
            continue;
        };
        let first = || values.first().and_then(|v| v.parse::<u64>().ok());
        match key {
            "cpu" => {
                if values.len() < 7 {
                    return Err(format!("Invalid cpu line: {}", line));
                }
                let field = |i: usize| values.get(i).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
                summary.cpu = CpuStat {
                    user: field(0),
                    nice: field(1),
                    system: field(2),
                    idle: field(3),
                    iowait: field(4),
                    irq: field(5),
                    softirq: field(6),
                    steal: field(7),
                };
                found_cpu = true;
            }
            "intr" => summary.interrupts = first(),
            "ctxt" => summary.context_switches = first(),
            "procs_running" => summary.procs_running = first(),
            "procs_blocked" => summary.procs_blocked = first(),
            _ => {}
        }
    }

    if !found_cpu {
        return Err("No aggregate cpu line in stat".to_string());
    }
    Ok(summary)
}

/// System load averages for 1, 5, and 15 minute intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one_min: f64,
    pub five_min: f64,
    pub fifteen_min: f64,
}

/// Parse `/proc/loadavg`. Format: "0.00 0.01 0.05 1/234 5678"
pub fn parse_load_average(content: &str) -> std::result::Result<LoadAverage, String> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(format!(
            "Invalid loadavg format: expected at least 3 fields, got {}",
            parts.len()
        ));
    }
    let parse = |i: usize, label: &str| {
        parts[i]
            .parse::<f64>()
            .map_err(|e| format!("Failed to parse {} load average: {}", label, e))
    };
    Ok(LoadAverage {
        one_min: parse(0, "1min")?,
        five_min: parse(1, "5min")?,
        fifteen_min: parse(2, "15min")?,
    })
}

/// Percentages of each time class between two readings, `None` if no time
/// passed or the counters went backwards.
pub fn utilization(previous: &CpuStat, current: &CpuStat) -> Option<Vec<(&'static str, f64)>> {
    if current.total() <= previous.total() {
        return None;
    }
    let total = (current.total() - previous.total()) as f64;
    let share = |cur: u64, prev: u64| round_to(cur.saturating_sub(prev) as f64 / total * 100.0, 2);

    Some(vec![
        ("user", share(current.user + current.nice, previous.user + previous.nice)),
        (
            "system",
            share(
                current.system + current.irq + current.softirq,
                previous.system + previous.irq + previous.softirq,
            ),
        ),
        ("idle", share(current.idle, previous.idle)),
        ("io_wait", share(current.iowait, previous.iowait)),
        ("steal", share(current.steal, previous.steal)),
    ])
}

#[derive(Debug, Clone)]
pub struct CpuCollector {
    proc_root: PathBuf,
    platform: Platform,
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl CpuCollector {
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

    fn report_load(&self, sampler: &mut Sampler) {
        let loadavg = super::read_proc_file(FAMILY, &self.proc_root.join("loadavg"))
            .and_then(|c| parse_load_average(&c).map_err(|e| SamplerError::unavailable(FAMILY, e)));
        match loadavg {
            Ok(load) => sampler.report([
                ("last_minute", load.one_min),
                ("last_five_minutes", load.five_min),
                ("last_fifteen_minutes", load.fifteen_min),
            ]),
            Err(e) => debug!("No load averages this run: {}", e),
        }
    }
}

impl MetricSource for CpuCollector {
    fn name(&self) -> &str {
        FAMILY
    }

    fn build_report(&mut self, sampler: &mut Sampler) -> Result<()> {
        require_procfs(FAMILY, self.platform)?;
        self.report_load(sampler);

        let content = super::read_proc_file(FAMILY, &self.proc_root.join("stat"))?;
        let stat = parse_stat(&content).map_err(|e| SamplerError::unavailable(FAMILY, e))?;

        if let Some(previous) = sampler.memory::<CpuStat>("cpu_stat") {
            if let Some(shares) = utilization(&previous, &stat.cpu) {
                sampler.report(shares);
            }
        }
        sampler.remember("cpu_stat", &stat.cpu)?;

        let rate = RateOptions::per_second().round(2);
        if let Some(intr) = stat.interrupts {
            sampler.counter("Interrupts", intr as f64, rate)?;
        }
        if let Some(ctxt) = stat.context_switches {
            sampler.counter("Context switches", ctxt as f64, rate)?;
        }
        if let Some(running) = stat.procs_running {
            sampler.report_value("procs_running", running);
        }
        if let Some(blocked) = stat.procs_blocked {
            sampler.report_value("procs_blocked", blocked);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn stat(user: u64, system: u64, idle: u64, iowait: u64, ctxt: u64) -> String {
        format!(
            "cpu  {} 0 {} {} {} 0 0 0 0 0
cpu0 {} 0 {} {} {} 0 0 0 0 0
intr 1000 0 0
ctxt {}
btime 1700000000
procs_running 3
procs_blocked 1
",
            user, system, idle, iowait, user, system, idle, iowait, ctxt
        )
    }

    #[test]
    fn test_parse_stat() {
        let summary = parse_stat(&stat(10, 20, 30, 40, 500)).unwrap();
        assert_eq!(summary.cpu.user, 10);
        assert_eq!(summary.cpu.system, 20);
        assert_eq!(summary.cpu.total(), 100);
        assert_eq!(summary.interrupts, Some(1000));
        assert_eq!(summary.context_switches, Some(500));
        assert_eq!(summary.procs_running, Some(3));
    }

    #[test]
    fn test_parse_stat_without_cpu_line() {
        assert!(parse_stat("intr 1\nctxt 2\n").is_err());
    }

    #[test]
    fn test_parse_load_average() {
        let load = parse_load_average("0.50 1.00 1.50 1/234 5678\n").unwrap();
        assert_eq!(load.one_min, 0.5);
        assert_eq!(load.fifteen_min, 1.5);
        assert!(parse_load_average("0.5 1.0").is_err());
        assert!(parse_load_average("a b c").is_err());
    }

    #[test]
    fn test_utilization_requires_progress() {
        let a = CpuStat {
            user: 10,
            idle: 90,
            ..CpuStat::default()
        };
        assert!(utilization(&a, &a).is_none());
    }

    #[test]
    fn test_collector_reports_shares_after_second_run() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("loadavg"), "0.25 0.50 0.75 1/100 42\n").expect("Failed to write loadavg");
        fs::write(dir.path().join("stat"), stat(100, 100, 700, 100, 1000)).expect("Failed to write stat");

        let clock = ManualClock::new(1_000.0);
        let mut sampler = Sampler::with_clock("cpu", Arc::new(clock.clone()));
        let mut collector = CpuCollector::new(dir.path()).with_platform(Platform::Linux);

        let out = sampler.run(&mut collector).unwrap();
        assert_eq!(out["last_minute"].as_f64(), Some(0.25));
        assert_eq!(out["procs_running"].as_f64(), Some(3.0));
        assert!(!out.contains_key("user"));
        assert!(!out.contains_key("context_switches"));

        clock.advance(2.0);
        fs::write(dir.path().join("stat"), stat(130, 110, 750, 110, 1500)).expect("Failed to write stat");
        let out = sampler.run(&mut collector).unwrap();
        assert_eq!(out["user"].as_f64(), Some(30.0));
        assert_eq!(out["system"].as_f64(), Some(10.0));
        assert_eq!(out["idle"].as_f64(), Some(50.0));
        assert_eq!(out["io_wait"].as_f64(), Some(10.0));
        assert_eq!(out["steal"].as_f64(), Some(0.0));
        assert_eq!(out["context_switches"].as_f64(), Some(250.0));
        assert_eq!(out["interrupts"].as_f64(), Some(0.0));
    }

    #[test]
    fn test_missing_loadavg_still_reports_stat() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("stat"), stat(1, 1, 1, 1, 1)).expect("Failed to write stat");
        let mut sampler = Sampler::new("cpu");
        let mut collector = CpuCollector::new(dir.path()).with_platform(Platform::Linux);
        let out = sampler.run(&mut collector).unwrap();
        assert!(!out.contains_key("last_minute"));
        assert_eq!(out["procs_blocked"].as_f64(), Some(1.0));
    }
}
