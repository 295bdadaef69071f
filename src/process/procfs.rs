//! Process table read from the Linux `/proc` filesystem.
//!
//! `/proc/<pid>/stat` is parsed for ppid, CPU ticks and resident pages.
//! Children of `kthreadd` (kworker, ksoftirqd, migration, ...) are folded into
//! a single `kthreadd` record since hosts commonly run hundreds of them.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::record::{ProcessRecord, ProcessTableProvider, DEFAULT_PAGE_SIZE, DEFAULT_TICK_RATE};
use crate::clock::Timestamp;
use crate::error::{Result, SamplerError};

fn sysconf_positive(name: libc::c_int) -> Option<i64> {
    // SAFETY: sysconf only reads system configuration.
    // Returns -1 on error, 0 if undefined - both are handled by the > 0 check
    let value = unsafe { libc::sysconf(name) };
    (value > 0).then_some(value as i64)
}

/// System clock ticks per second.
pub static CLK_TCK: Lazy<f64> =
    Lazy::new(|| sysconf_positive(libc::_SC_CLK_TCK).map_or(DEFAULT_TICK_RATE, |v| v as f64));

/// Memory page size in bytes.
pub static PAGE_SIZE: Lazy<u64> =
    Lazy::new(|| sysconf_positive(libc::_SC_PAGESIZE).map_or(DEFAULT_PAGE_SIZE, |v| v as u64));

/// Count `processor` lines in a cpuinfo file.
pub fn count_processors(cpuinfo: &Path) -> Option<u32> {
    let content = fs::read_to_string(cpuinfo).ok()?;
    let count = content
        .lines()
        .filter(|line| line.starts_with("processor"))
        .count() as u32;
    (count > 0).then_some(count)
}

/// Fields of `/proc/<pid>/stat` needed for a [`ProcessRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidStat {
    pub pid: u32,
    pub comm: String,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub rss_pages: u64,
}

/// Parse the content of a `/proc/<pid>/stat` file.
///
/// The command sits between the first `(` and the last `)` and may contain
/// spaces and parentheses itself; spaces are replaced with `-`.
pub fn parse_pid_stat(content: &str) -> std::result::Result<PidStat, String> {
    let open = content.find('(').ok_or("Missing '(' in stat")?;
    let close = content.rfind(')').ok_or("Missing ')' in stat")?;
    if close < open {
        return Err("Malformed command in stat".into());
    }

    let pid: u32 = content[..open]
        .trim()
        .parse()
        .map_err(|_| "Invalid pid in stat".to_string())?;
    let comm = content[open + 1..close].replace(' ', "-");

    // state ppid pgrp session tty_nr tpgid flags minflt cminflt majflt cmajflt
    // utime stime cutime cstime priority nice num_threads itrealvalue starttime
    // vsize rss ...
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 22 {
        return Err(format!("Too few fields in stat: {}", rest.len() + 2));
    }

    let field = |i: usize, name: &str| -> std::result::Result<u64, String> {
        rest[i]
            .parse::<i64>()
            .map(|v| v.max(0) as u64)
            .map_err(|_| format!("Invalid {} in stat: '{}'", name, rest[i]))
    };

    Ok(PidStat {
        pid,
        comm,
        ppid: field(1, "ppid")? as u32,
        utime: field(11, "utime")?,
        stime: field(12, "stime")?,
        rss_pages: field(21, "rss")?,
    })
}

/// Read `/proc/<pid>/cmdline` with NUL separators turned into spaces.
/// Kernel threads have an empty cmdline and get `[comm]`.
fn read_cmdline(proc_path: &Path, comm: &str) -> String {
    let raw = fs::read(proc_path.join("cmdline")).unwrap_or_default();
    let cmdline = raw
        .split(|&b| b == 0u8)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part))
        .collect::<Vec<_>>()
        .join(" ");
    if cmdline.is_empty() {
        format!("[{}]", comm)
    } else {
        cmdline
    }
}

fn read_process(proc_path: &Path) -> Option<ProcessRecord> {
    // Processes may exit while the table is being read; skip them
    let content = match fs::read_to_string(proc_path.join("stat")) {
        Ok(c) => c,
        Err(e) => {
            debug!("Failed to read {}: {}", proc_path.display(), e);
            return None;
        }
    };
    let stat = match parse_pid_stat(&content) {
        Ok(s) => s,
        Err(e) => {
            debug!("Skipping {}: {}", proc_path.display(), e);
            return None;
        }
    };
    let cmdline = read_cmdline(proc_path, &stat.comm);

    Some(ProcessRecord {
        pid: stat.pid,
        ppid: stat.ppid,
        command: stat.comm,
        cmdline,
        utime: stat.utime,
        stime: stat.stime,
        rss_pages: Some(stat.rss_pages),
    })
}

/// Fold all children of the first `kthreadd` (or `kthread`) process into it.
pub fn fold_kernel_threads(records: Vec<ProcessRecord>) -> Vec<ProcessRecord> {
    let Some(parent) = records
        .iter()
        .find(|r| r.command == "kthreadd" || r.command == "kthread")
        .map(|r| r.pid)
    else {
        return records;
    };

    let mut folded = Vec::with_capacity(records.len());
    let mut utime = 0u64;
    let mut stime = 0u64;
    let mut rss = 0u64;
    let mut kthreadd = None;

    for record in records {
        if record.pid == parent {
            kthreadd = Some(record);
        } else if record.ppid == parent {
            utime = utime.saturating_add(record.utime);
            stime = stime.saturating_add(record.stime);
            rss = rss.saturating_add(record.rss_pages.unwrap_or(0));
        } else {
            folded.push(record);
        }
    }

    if let Some(mut k) = kthreadd {
        k.utime = k.utime.saturating_add(utime);
        k.stime = k.stime.saturating_add(stime);
        k.rss_pages = Some(k.rss_pages.unwrap_or(0).saturating_add(rss));
        folded.push(k);
    }
    folded
}

/// Linux process table provider.
#[derive(Debug, Clone)]
pub struct ProcfsProcessTable {
    root: PathBuf,
    tick_rate: f64,
    page_size: u64,
    num_processors: u32,
}

impl Default for ProcfsProcessTable {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsProcessTable {
    /// Provider reading from `root` (normally `/proc`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let num_processors = sysconf_positive(libc::_SC_NPROCESSORS_ONLN)
            .map(|v| v as u32)
            .or_else(|| count_processors(&root.join("cpuinfo")))
            .unwrap_or(1);
        Self {
            root,
            tick_rate: *CLK_TCK,
            page_size: *PAGE_SIZE,
            num_processors,
        }
    }

    pub fn with_tick_rate(mut self, tick_rate: f64) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_num_processors(mut self, num_processors: u32) -> Self {
        self.num_processors = num_processors.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pid_dirs(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| SamplerError::unavailable("processes", format!("{}: {}", self.root.display(), e)))?;
        let mut dirs: Vec<(u32, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
                Some((pid, entry.path()))
            })
            .collect();
        dirs.sort_by_key(|(pid, _)| *pid);
        Ok(dirs.into_iter().map(|(_, path)| path).collect())
    }

    /// Seconds since boot from `<root>/uptime`.
    pub fn read_uptime(&self) -> std::result::Result<f64, String> {
        let path = self.root.join("uptime");
        let content = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        content
            .split_whitespace()
            .next()
            .ok_or_else(|| "Empty uptime file".to_string())?
            .parse()
            .map_err(|e| format!("Invalid uptime value: {}", e))
    }
}

impl ProcessTableProvider for ProcfsProcessTable {
    fn process_table(&mut self) -> Result<Vec<ProcessRecord>> {
        let dirs = self.pid_dirs()?;
        // Indexed parallel collect keeps pid order
        let records: Vec<ProcessRecord> = dirs
            .par_iter()
            .filter_map(|dir| read_process(dir))
            .collect();
        Ok(fold_kernel_threads(records))
    }

    fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    fn num_processors(&self) -> u32 {
        self.num_processors
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn current_ticks(&mut self, now: Timestamp) -> Result<u64> {
        match self.read_uptime() {
            Ok(uptime) => Ok((uptime * self.tick_rate) as u64),
            Err(e) => {
                debug!("Falling back to clock ticks: {}", e);
                Ok((now * self.tick_rate) as u64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stat_line(pid: u32, comm: &str, ppid: u32, utime: u64, stime: u64, rss: u64) -> String {
        format!(
            "{} ({}) S {} {} {} 0 -1 4194304 100 0 0 0 {} {} 0 0 20 0 1 0 12345 12345678 {} 18446744073709551615 0 0 0 0",
            pid, comm, ppid, pid, pid, utime, stime, rss
        )
    }

    fn write_pid(root: &Path, pid: u32, stat: &str, cmdline: &[u8]) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).expect("Failed to create pid dir");
        fs::write(dir.join("stat"), stat).expect("Failed to write stat");
        fs::write(dir.join("cmdline"), cmdline).expect("Failed to write cmdline");
    }

    #[test]
    fn test_parse_pid_stat() {
        let stat = parse_pid_stat(&stat_line(1234, "nginx", 1, 1000, 500, 2048)).unwrap();
        assert_eq!(stat.pid, 1234);
        assert_eq!(stat.comm, "nginx");
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.utime, 1000);
        assert_eq!(stat.stime, 500);
        assert_eq!(stat.rss_pages, 2048);
    }

    #[test]
    fn test_parse_pid_stat_comm_with_spaces_and_parens() {
        let stat = parse_pid_stat(&stat_line(7, "Web Content (x)", 1, 3, 4, 5)).unwrap();
        assert_eq!(stat.comm, "Web-Content-(x)");
        assert_eq!(stat.utime, 3);
        assert_eq!(stat.rss_pages, 5);
    }

    #[test]
    fn test_parse_pid_stat_truncated() {
        assert!(parse_pid_stat("1234 (test) S 1 2 3").is_err());
        assert!(parse_pid_stat("garbage").is_err());
    }

    #[test]
    fn test_process_table_from_fake_proc() {
        let dir = tempdir().expect("Failed to create temp dir");
        let root = dir.path();
        write_pid(root, 1, &stat_line(1, "systemd", 0, 50, 20, 300), b"/sbin/init\0splash\0");
        write_pid(root, 2, &stat_line(2, "kthreadd", 0, 1, 1, 0), b"");
        write_pid(root, 10, &stat_line(10, "kworker/0:1", 2, 5, 7, 0), b"");
        write_pid(root, 11, &stat_line(11, "ksoftirqd/0", 2, 3, 2, 0), b"");
        write_pid(root, 300, &stat_line(300, "nginx", 1, 10, 10, 100), b"nginx: worker\0");
        fs::write(root.join("uptime"), "350735.50 234388.90\n").expect("Failed to write uptime");
        fs::create_dir_all(root.join("self")).expect("Failed to create self dir");

        let mut table = ProcfsProcessTable::new(root).with_tick_rate(100.0);
        let records = table.process_table().unwrap();

        let commands: Vec<&str> = records.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, vec!["systemd", "nginx", "kthreadd"]);
        assert_eq!(records[0].cmdline, "/sbin/init splash");
        assert_eq!(records[0].rss_pages, Some(300));

        let kthreadd = &records[2];
        assert_eq!(kthreadd.cmdline, "[kthreadd]");
        assert_eq!(kthreadd.utime, 1 + 5 + 3);
        assert_eq!(kthreadd.stime, 1 + 7 + 2);

        assert_eq!(table.current_ticks(0.0).unwrap(), 35_073_550);
    }

    #[test]
    fn test_current_ticks_falls_back_to_clock() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut table = ProcfsProcessTable::new(dir.path()).with_tick_rate(100.0);
        assert_eq!(table.current_ticks(12.5).unwrap(), 1250);
    }

    #[test]
    fn test_missing_root_is_unavailable() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut table = ProcfsProcessTable::new(dir.path().join("missing"));
        let err = table.process_table().unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_count_processors() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("cpuinfo");
        fs::write(&path, "processor\t: 0\nmodel name\t: x\n\nprocessor\t: 1\n").expect("Failed to write cpuinfo");
        assert_eq!(count_processors(&path), Some(2));
        assert_eq!(count_processors(&dir.path().join("nope")), None);
    }

    #[test]
    fn test_clk_tck_is_positive() {
        assert!(*CLK_TCK > 0.0);
        assert!(*PAGE_SIZE > 0);
    }
}
