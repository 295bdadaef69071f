//! Disk I/O statistics from `/proc/diskstats`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Counters of one `/proc/diskstats` line.
///
/// Format: major minor name rio rmerge rsect ruse wio wmerge wsect wuse
/// running use aveq
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStats {
    pub name: String,
    /// Reads completed.
    pub rio: u64,
    pub rmerge: u64,
    /// Sectors read (512 bytes).
    pub rsect: u64,
    /// Milliseconds spent reading.
    pub ruse: u64,
    /// Writes completed.
    pub wio: u64,
    pub wmerge: u64,
    pub wsect: u64,
    pub wuse: u64,
    /// I/Os currently in flight.
    pub running: u64,
    /// Milliseconds spent doing I/O.
    #[serde(rename = "use")]
    pub use_ms: u64,
    /// Weighted milliseconds spent doing I/O. Not present on every kernel.
    pub aveq: Option<u64>,
}

/// Parse the content of `/proc/diskstats`. Malformed lines are skipped.
pub fn parse_diskstats(content: &str) -> Vec<DiskStats> {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 13 {
                return None;
            }
            let num = |i: usize| parts[i].parse::<u64>().unwrap_or(0);
            Some(DiskStats {
                name: parts[2].to_string(),
                rio: num(3),
                rmerge: num(4),
                rsect: num(5),
                ruse: num(6),
                wio: num(7),
                wmerge: num(8),
                wsect: num(9),
                wuse: num(10),
                running: num(11),
                use_ms: num(12),
                aveq: parts.get(13).and_then(|v| v.parse().ok()),
            })
        })
        .collect()
}

/// Read `<root>/diskstats`.
pub fn read_diskstats(root: &Path) -> Result<Vec<DiskStats>> {
    let content = super::read_proc_file("disk", &root.join("diskstats"))?;
    Ok(parse_diskstats(&content))
}

/// Find the diskstats entry of a mounted device such as `/dev/sda1`.
///
/// An exact name match wins. Otherwise the first entry whose name is
/// contained in the device path is used, since mount output and diskstats
/// don't always agree on naming (`/dev/root`, mapper paths).
pub fn find_device<'a>(device: &str, stats: &'a [DiskStats]) -> Option<&'a DiskStats> {
    let short = device.strip_prefix("/dev/").unwrap_or(device);
    stats
        .iter()
        .find(|s| s.name == short)
        .or_else(|| stats.iter().find(|s| device.contains(s.name.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKSTATS: &str = "   7       0 loop0 52 0 2154 12 0 0 0 0 0 32 12 0 0 0 0
   8       0 sda 158203 51624 7926454 125483 327645 389004 13817640 1282356 0 512040 1407839
   8       1 sda1 157946 51624 7917654 125430 327645 389004 13817640 1282356 2 511992 1407786
 253       0 dm-0 1000 0 8000 500 2000 0 16000 900 0 1200
";

    #[test]
    fn test_parse_diskstats() {
        let stats = parse_diskstats(DISKSTATS);
        assert_eq!(stats.len(), 4);
        let sda1 = &stats[2];
        assert_eq!(sda1.name, "sda1");
        assert_eq!(sda1.rio, 157946);
        assert_eq!(sda1.rsect, 7917654);
        assert_eq!(sda1.wio, 327645);
        assert_eq!(sda1.running, 2);
        assert_eq!(sda1.use_ms, 511992);
        assert_eq!(sda1.aveq, Some(1407786));
        assert_eq!(stats[3].aveq, None);
    }

    #[test]
    fn test_parse_skips_malformed() {
        assert!(parse_diskstats("8 0 sda 1 2 3\n\n").is_empty());
    }

    #[test]
    fn test_find_device_prefers_exact_match() {
        let stats = parse_diskstats(DISKSTATS);
        assert_eq!(find_device("/dev/sda1", &stats).map(|s| s.name.as_str()), Some("sda1"));
        assert_eq!(find_device("/dev/sda", &stats).map(|s| s.name.as_str()), Some("sda"));
        // Partition missing from diskstats falls back to the containing disk
        assert_eq!(find_device("/dev/sda9", &stats).map(|s| s.name.as_str()), Some("sda"));
        assert!(find_device("/dev/nvme0n1", &stats).is_none());
    }
}
