//! Mounted block devices and their sizes.
//!
//! Devices come from `/proc/mounts` (entries whose source starts with
//! `/dev`); sizes come from libc `statvfs` on the mount point.

use std::path::Path;

use crate::error::Result;
use crate::sampler::round_to;

/// A mounted block device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fstype: String,
}

/// Block devices in a mounts file, first mount of each device only.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    let mut mounts: Vec<MountEntry> = Vec::new();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || !parts[0].starts_with("/dev") {
            continue;
        }
        if mounts.iter().any(|m| m.device == parts[0]) {
            continue;
        }
        mounts.push(MountEntry {
            device: parts[0].to_string(),
            mount_point: unescape_mount_path(parts[1]),
            fstype: parts[2].to_string(),
        });
    }
    mounts
}

/// Mount points with spaces appear octal-escaped (`\040`).
fn unescape_mount_path(path: &str) -> String {
    path.replace("\\040", " ").replace("\\011", "\t")
}

/// Read `<root>/mounts`.
pub fn read_mounts(root: &Path) -> Result<Vec<MountEntry>> {
    let content = super::read_proc_file("disk", &root.join("mounts"))?;
    Ok(parse_mounts(&content))
}

/// Filesystem sizes in MB, as `df` reports them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilesystemUsage {
    pub size_mb: f64,
    pub used_mb: f64,
    pub avail_mb: f64,
    /// Used share of the space available to unprivileged users, rounded up.
    pub used_percent: f64,
}

impl FilesystemUsage {
    pub fn from_blocks(block_size: u64, blocks: u64, free: u64, available: u64) -> Self {
        let to_mb = |blocks: u64| round_to((blocks as f64 * block_size as f64) / 1024.0 / 1024.0, 1);
        let used = blocks.saturating_sub(free);
        let denominator = used + available;
        let used_percent = if denominator == 0 {
            0.0
        } else {
            (used as f64 * 100.0 / denominator as f64).ceil()
        };
        Self {
            size_mb: to_mb(blocks),
            used_mb: to_mb(used),
            avail_mb: to_mb(available),
            used_percent,
        }
    }
}

/// Gets filesystem usage using libc statvfs.
pub fn statvfs_usage(path: &str) -> std::result::Result<FilesystemUsage, String> {
    use std::ffi::CString;
    use std::mem;

    let c_path = CString::new(path).map_err(|e| format!("Invalid path: {}", e))?;

    // SAFETY: c_path is a valid NUL-terminated string and stat is a plain
    // C struct fully written by statvfs on success.
    unsafe {
        let mut stat: libc::statvfs = mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(format!(
                "statvfs failed for {}: {}",
                path,
                std::io::Error::last_os_error()
            ));
        }

        Ok(FilesystemUsage::from_blocks(
            stat.f_frsize as u64,
            stat.f_blocks as u64,
            stat.f_bfree as u64,
            stat.f_bavail as u64,
        ))
    }
}
