//! Builds the enabled collectors from the configuration and runs them.
//!
//! One cycle runs every collector once. A failing collector is logged and
//! left out of the cycle report; the others still report.

use anyhow::Context;
use chrono::{DateTime, Utc};
use herakles_sampler::collectors::{
    BundledJob, CpuCollector, DiskCollector, MemoryCollector, NetworkCollector, ProcessJob,
    SamplerJob,
};
use herakles_sampler::process::{
    AggregatorOptions, ProcessAggregator, ProcessTableProvider, ProcfsProcessTable,
    StaticProcessTable,
};
use herakles_sampler::Collector;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Reports of one cycle keyed by collector id.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub collectors: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

fn process_provider(config: &Config) -> anyhow::Result<Box<dyn ProcessTableProvider + Send>> {
    match &config.test_data_file {
        Some(path) => {
            info!("Using synthetic process table from {}", path.display());
            let table = StaticProcessTable::from_json_file(path)
                .with_context(|| format!("Failed to load test data file {}", path.display()))?;
            Ok(Box::new(table))
        }
        None => Ok(Box::new(ProcfsProcessTable::new(config.proc_root()))),
    }
}

/// Create every collector enabled in `config`, in a fixed order.
pub fn build_collectors(config: &Config) -> anyhow::Result<Vec<Box<dyn Collector>>> {
    let root = config.proc_root();
    let mut collectors: Vec<Box<dyn Collector>> = Vec::new();

    if config.enable_disk_collector.unwrap_or(true) {
        collectors.push(Box::new(BundledJob::new("disk", DiskCollector::new(&root))));
    }

    if config.enable_network_collector.unwrap_or(true) {
        let network = NetworkCollector::new(&root, config.interface_pattern())?
            .with_rate(config.network_rate()?)?;
        collectors.push(Box::new(BundledJob::new("network", network)));
    }

    if config.enable_memory_collector.unwrap_or(true) {
        collectors.push(Box::new(SamplerJob::new("memory", MemoryCollector::new(&root))));
    }

    if config.enable_cpu_collector.unwrap_or(true) {
        collectors.push(Box::new(SamplerJob::new("cpu", CpuCollector::new(&root))));
    }

    if config.enable_process_collector.unwrap_or(true) {
        let options = AggregatorOptions {
            normalization: config.cpu_normalization()?,
            top_n: config.top_n(),
            selection: config.selection_mode()?,
        };
        let aggregator = ProcessAggregator::new(process_provider(config)?, options);
        collectors.push(Box::new(ProcessJob::new("processes", aggregator)));
    }

    let ids: Vec<&str> = collectors.iter().map(|c| c.id()).collect();
    info!("Enabled collectors: {}", ids.join(", "));
    Ok(collectors)
}

/// Run every collector once.
pub fn run_cycle(collectors: &mut [Box<dyn Collector>]) -> CycleReport {
    let mut report = CycleReport {
        timestamp: Utc::now(),
        collectors: BTreeMap::new(),
        errors: BTreeMap::new(),
    };

    for collector in collectors.iter_mut() {
        let start = Instant::now();
        match collector.collect() {
            Ok(value) => {
                debug!(
                    "Collector {} finished in {:.2}ms",
                    collector.id(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
                report.collectors.insert(collector.id().to_string(), value);
            }
            Err(e) => {
                warn!("Collector {} failed: {}", collector.id(), e);
                report.errors.insert(collector.id().to_string(), e.to_string());
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_build_respects_enable_flags() {
        let config = Config {
            enable_disk_collector: Some(false),
            enable_network_collector: Some(false),
            ..Config::default()
        };
        let collectors = build_collectors(&config).unwrap();
        let ids: Vec<&str> = collectors.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["memory", "cpu", "processes"]);
    }

    #[test]
    fn test_invalid_pattern_fails_build() {
        let config = Config {
            interface_pattern: Some("eth(".into()),
            ..Config::default()
        };
        assert!(build_collectors(&config).is_err());
    }

    #[test]
    fn test_failing_collector_does_not_stop_cycle() {
        let dir = tempdir().expect("Failed to create temp dir");
        let data = dir.path().join("processes.json");
        fs::write(
            &data,
            r#"{"processes": [{"pid": 1, "command": "init", "rss_pages": 256}], "ticks": 100}"#,
        )
        .expect("Failed to write test data");

        // top_n 0 makes the process collector fail at run time
        let config = Config {
            proc_root: Some(dir.path().to_path_buf()),
            enable_disk_collector: Some(false),
            enable_network_collector: Some(false),
            enable_cpu_collector: Some(false),
            top_n: Some(0),
            test_data_file: Some(data),
            ..Config::default()
        };
        fs::write(
            dir.path().join("meminfo"),
            "MemTotal: 2048 kB\nMemFree: 1024 kB\n",
        )
        .expect("Failed to write meminfo");

        let mut collectors = build_collectors(&config).unwrap();
        let report = run_cycle(&mut collectors);
        assert!(report.errors.contains_key("processes"));
        if cfg!(target_os = "linux") {
            assert_eq!(report.collectors["memory"]["size"].as_f64(), Some(2.0));
        }
    }
}
