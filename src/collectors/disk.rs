//! Disk collector: sizes and I/O rates per mounted block device.
//!
//! Reports one bundle per device (e.g. `/dev/sda1`) holding:
//! - `filesystem`, `mounted_on`, `size`, `used`, `avail` (MB), `used_percent`
//! - `rps`, `wps` (operations/s), `rps_kb`, `wps_kb` (KB/s)
//! - `utilization` (percent of time busy), `average_queue_length`
//! - `await` (ms per operation since the last run)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::debug;

use super::diskstats::{find_device, read_diskstats, DiskStats};
use super::filesystem::{read_mounts, statvfs_usage, MountEntry};
use crate::error::Result;
use crate::platform::Platform;
use crate::sampler::{require_procfs, BundleSource, BundledSampler, RateOptions};

const FAMILY: &str = "disk";

/// Subset of the counters remembered between runs for `await`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct IoTimes {
    rio: u64,
    wio: u64,
    ruse: u64,
    wuse: u64,
}

impl From<&DiskStats> for IoTimes {
    fn from(s: &DiskStats) -> Self {
        Self {
            rio: s.rio,
            wio: s.wio,
            ruse: s.ruse,
            wuse: s.wuse,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiskCollector {
    proc_root: PathBuf,
    platform: Platform,
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl DiskCollector {
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

    fn report_sizes(&self, sampler: &mut BundledSampler, mount: &MountEntry) {
        match statvfs_usage(&mount.mount_point) {
            Ok(usage) => {
                let device = mount.device.as_str();
                sampler.report_value(device, "filesystem", device);
                sampler.report_value(device, "mounted_on", mount.mount_point.as_str());
                sampler.report(
                    device,
                    [
                        ("size", usage.size_mb),
                        ("used", usage.used_mb),
                        ("avail", usage.avail_mb),
                        ("used_percent", usage.used_percent),
                    ],
                );
            }
            Err(e) => debug!("Skipping sizes of {}: {}", mount.device, e),
        }
    }

    fn report_stats(
        &self,
        sampler: &mut BundledSampler,
        device: &str,
        stats: &DiskStats,
    ) -> Result<()> {
        let per_second = RateOptions::per_second();
        sampler.counter(device, "rps", stats.rio as f64, per_second)?;
        sampler.counter(device, "wps", stats.wio as f64, per_second)?;
        sampler.counter(device, "rps_kb", stats.rsect as f64 / 2.0, per_second)?;
        sampler.counter(device, "wps_kb", stats.wsect as f64 / 2.0, per_second)?;
        // ms busy per second / 10 = percent busy
        sampler.counter(device, "utilization", stats.use_ms as f64 / 10.0, per_second)?;
        if let Some(aveq) = stats.aveq {
            sampler.counter(device, "average_queue_length", aveq as f64, per_second)?;
        }

        let current = IoTimes::from(stats);
        if let Some(old) = sampler.memory::<IoTimes>(device, "stats") {
            let ios = current.rio as f64 - old.rio as f64 + current.wio as f64 - old.wio as f64;
            if ios > 0.0 {
                let ticks = current.ruse as f64 - old.ruse as f64 + current.wuse as f64
                    - old.wuse as f64;
                sampler.report_value(device, "await", ticks / ios);
            }
        }
        sampler.remember(device, "stats", &current)
    }
}

impl BundleSource for DiskCollector {
    fn name(&self) -> &str {
        FAMILY
    }

    fn build_report(&mut self, sampler: &mut BundledSampler) -> Result<()> {
        require_procfs(FAMILY, self.platform)?;
        let mounts = read_mounts(&self.proc_root)?;

        // Sizes are still useful when diskstats can't be read
        let stats = match read_diskstats(&self.proc_root) {
            Ok(stats) => stats,
            Err(e) => {
                debug!("No I/O counters this run: {}", e);
                Vec::new()
            }
        };

        let mut seen = BTreeSet::new();
        for mount in &mounts {
            seen.insert(mount.device.as_str());
            self.report_sizes(sampler, mount);
            if let Some(entry) = find_device(&mount.device, &stats) {
                self.report_stats(sampler, &mount.device, entry)?;
            }
        }

        let gone: Vec<String> = sampler
            .bundles()
            .filter(|b| !seen.contains(*b))
            .map(str::to_string)
            .collect();
        for bundle in gone {
            debug!(device = %bundle, "Device no longer mounted, dropping its memory");
            sampler.forget_bundle(&bundle);
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

    #[test]
    fn test_unsupported_platform_is_unavailable() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut collector = DiskCollector::new(dir.path()).with_platform(Platform::Darwin);
        let mut sampler = BundledSampler::new("disk");
        let err = collector.build_report(&mut sampler).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_rates_and_await() {
        let dir = tempdir().expect("Failed to create temp dir");
        let proc_root = dir.path().join("proc");
        let mount_point = dir.path().join("data");
        fs::create_dir_all(&proc_root).expect("Failed to create proc dir");
        fs::create_dir_all(&mount_point).expect("Failed to create mount dir");
        fs::write(
            proc_root.join("mounts"),
            format!("/dev/fake0 {} ext4 rw 0 0\n", mount_point.display()),
        )
        .expect("Failed to write mounts");
        let write_stats = |rio: u64, ruse: u64, wio: u64, wuse: u64, rsect: u64, use_ms: u64| {
            fs::write(
                proc_root.join("diskstats"),
                format!(
                    "8 0 fake0 {} 0 {} {} {} 0 0 {} 0 {} 0\n",
                    rio, rsect, ruse, wio, wuse, use_ms
                ),
            )
            .expect("Failed to write diskstats");
        };

        let clock = ManualClock::new(1_000.0);
        let mut sampler = BundledSampler::with_clock("disk", Arc::new(clock.clone()));
        let mut collector = DiskCollector::new(&proc_root).with_platform(Platform::Linux);

        write_stats(100, 1000, 50, 500, 2000, 10_000);
        let out = sampler.run(&mut collector).unwrap();
        let first = &out["/dev/fake0"];
        assert_eq!(first["mounted_on"].as_str(), Some(mount_point.to_str().unwrap()));
        assert!(first.contains_key("size"));
        assert!(!first.contains_key("rps"));
        assert!(!first.contains_key("await"));

        clock.advance(2.0);
        write_stats(300, 1600, 150, 900, 6000, 11_000);
        let out = sampler.run(&mut collector).unwrap();
        let second = &out["/dev/fake0"];
        assert_eq!(second["rps"].as_f64(), Some(100.0));
        assert_eq!(second["wps"].as_f64(), Some(50.0));
        assert_eq!(second["rps_kb"].as_f64(), Some(1000.0));
        assert_eq!(second["utilization"].as_f64(), Some(50.0));
        assert_eq!(second["average_queue_length"].as_f64(), Some(0.0));
        // (600 + 400) ms over 300 ios
        let await_ms = second["await"].as_f64().unwrap();
        assert!((await_ms - 1000.0 / 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_unmounted_device_is_forgotten() {
        let dir = tempdir().expect("Failed to create temp dir");
        let proc_root = dir.path().join("proc");
        let mount_point = dir.path().join("data");
        fs::create_dir_all(&proc_root).expect("Failed to create proc dir");
        fs::create_dir_all(&mount_point).expect("Failed to create mount dir");
        fs::write(
            proc_root.join("diskstats"),
            "8 0 fake0 100 0 2000 1000 50 0 0 500 0 10000 0\n\
             8 16 fake1 7 0 80 10 3 0 0 20 0 300 0\n",
        )
        .expect("Failed to write diskstats");
        let write_mounts = |devices: &[&str]| {
            let lines: String = devices
                .iter()
                .map(|d| format!("/dev/{} {} ext4 rw 0 0\n", d, mount_point.display()))
                .collect();
            fs::write(proc_root.join("mounts"), lines).expect("Failed to write mounts");
        };

        let mut sampler = BundledSampler::new("disk");
        let mut collector = DiskCollector::new(&proc_root).with_platform(Platform::Linux);

        write_mounts(&["fake0", "fake1"]);
        sampler.run(&mut collector).unwrap();
        assert_eq!(
            sampler.bundles().collect::<Vec<_>>(),
            vec!["/dev/fake0", "/dev/fake1"]
        );

        write_mounts(&["fake0"]);
        sampler.run(&mut collector).unwrap();
        assert_eq!(sampler.bundles().collect::<Vec<_>>(), vec!["/dev/fake0"]);
    }

    #[test]
    fn test_missing_mounts_is_unavailable() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut collector = DiskCollector::new(dir.path()).with_platform(Platform::Linux);
        let mut sampler = BundledSampler::new("disk");
        assert!(sampler.run(&mut collector).unwrap().is_empty());
    }
}
