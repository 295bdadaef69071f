//! Process table rows and the providers that supply them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::clock::Timestamp;
use crate::error::{Result, SamplerError};

/// Default CPU accounting granularity (ticks per second).
pub const DEFAULT_TICK_RATE: f64 = 100.0;

/// Used when the page size can't be retrieved. Units are bytes.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    #[serde(default)]
    pub ppid: u32,
    /// Executable name without path or arguments; the grouping key.
    pub command: String,
    #[serde(default)]
    pub cmdline: String,
    /// User mode CPU ticks over the process lifetime.
    #[serde(default)]
    pub utime: u64,
    /// Kernel mode CPU ticks over the process lifetime.
    #[serde(default)]
    pub stime: u64,
    /// Resident set size in pages. `None` where the platform can't report it.
    #[serde(default)]
    pub rss_pages: Option<u64>,
}

impl ProcessRecord {
    pub fn new(pid: u32, command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            pid,
            ppid: 0,
            cmdline: command.clone(),
            command,
            utime: 0,
            stime: 0,
            rss_pages: None,
        }
    }

    pub fn with_cpu(mut self, utime: u64, stime: u64) -> Self {
        self.utime = utime;
        self.stime = stime;
        self
    }

    pub fn with_rss_pages(mut self, pages: u64) -> Self {
        self.rss_pages = Some(pages);
        self
    }

    pub fn with_cmdline(mut self, cmdline: impl Into<String>) -> Self {
        self.cmdline = cmdline.into();
        self
    }

    pub fn with_ppid(mut self, ppid: u32) -> Self {
        self.ppid = ppid;
        self
    }

    /// Lifetime CPU ticks, user plus system. Children are not included.
    pub fn cumulative_cpu(&self) -> u64 {
        self.utime.saturating_add(self.stime)
    }
}

/// Source of process tables and the platform constants needed to normalize
/// them.
pub trait ProcessTableProvider {
    /// Current process table, one record per live process.
    fn process_table(&mut self) -> Result<Vec<ProcessRecord>>;

    /// CPU ticks per second.
    fn tick_rate(&self) -> f64;

    fn num_processors(&self) -> u32;

    /// Bytes per page, for converting resident pages.
    fn page_size(&self) -> u64;

    /// Monotonic tick counter for tick-based normalization.
    ///
    /// Defaults to the wall clock expressed in ticks.
    fn current_ticks(&mut self, now: Timestamp) -> Result<u64> {
        Ok((now * self.tick_rate()) as u64)
    }
}

impl<P: ProcessTableProvider + ?Sized> ProcessTableProvider for Box<P> {
    fn process_table(&mut self) -> Result<Vec<ProcessRecord>> {
        (**self).process_table()
    }

    fn tick_rate(&self) -> f64 {
        (**self).tick_rate()
    }

    fn num_processors(&self) -> u32 {
        (**self).num_processors()
    }

    fn page_size(&self) -> u64 {
        (**self).page_size()
    }

    fn current_ticks(&mut self, now: Timestamp) -> Result<u64> {
        (**self).current_ticks(now)
    }
}

/// A process table held in memory.
///
/// Backs synthetic test data files and unit tests: the table and the tick
/// counter are set explicitly between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticProcessTable {
    #[serde(default)]
    pub processes: Vec<ProcessRecord>,
    #[serde(default = "default_tick_rate")]
    pub tick_rate: f64,
    #[serde(default = "default_num_processors")]
    pub num_processors: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Explicit tick counter; the wall clock is used when unset.
    #[serde(default)]
    pub ticks: Option<u64>,
}

fn default_tick_rate() -> f64 {
    DEFAULT_TICK_RATE
}
fn default_num_processors() -> u32 {
    1
}
fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl Default for StaticProcessTable {
    fn default() -> Self {
        Self {
            processes: Vec::new(),
            tick_rate: DEFAULT_TICK_RATE,
            num_processors: 1,
            page_size: DEFAULT_PAGE_SIZE,
            ticks: None,
        }
    }
}

impl StaticProcessTable {
    pub fn new(processes: Vec<ProcessRecord>) -> Self {
        Self {
            processes,
            ..Self::default()
        }
    }

    /// Load a table from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SamplerError::unavailable("processes", format!("{}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn set_processes(&mut self, processes: Vec<ProcessRecord>) {
        self.processes = processes;
    }

    pub fn set_ticks(&mut self, ticks: u64) {
        self.ticks = Some(ticks);
    }
}

impl ProcessTableProvider for StaticProcessTable {
    fn process_table(&mut self) -> Result<Vec<ProcessRecord>> {
        Ok(self.processes.clone())
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
        Ok(self
            .ticks
            .unwrap_or_else(|| (now * self.tick_rate) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cumulative_cpu() {
        let record = ProcessRecord::new(1, "a").with_cpu(10, 5);
        assert_eq!(record.cumulative_cpu(), 15);

        let record = ProcessRecord::new(1, "a").with_cpu(u64::MAX, 5);
        assert_eq!(record.cumulative_cpu(), u64::MAX);
    }

    #[test]
    fn test_static_table_ticks_default_to_clock() {
        let mut table = StaticProcessTable::default();
        assert_eq!(table.current_ticks(12.0).unwrap(), 1200);
        table.set_ticks(7);
        assert_eq!(table.current_ticks(12.0).unwrap(), 7);
    }

    #[test]
    fn test_static_table_from_json_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("processes.json");
        std::fs::write(
            &path,
            r#"{
                "num_processors": 4,
                "processes": [
                    {"pid": 1, "command": "init", "utime": 10, "stime": 2, "rss_pages": 100},
                    {"pid": 42, "command": "nginx", "cmdline": "nginx -g daemon off;"}
                ]
            }"#,
        )
        .expect("Failed to write test data");

        let table = StaticProcessTable::from_json_file(&path).unwrap();
        assert_eq!(table.num_processors, 4);
        assert_eq!(table.tick_rate, DEFAULT_TICK_RATE);
        assert_eq!(table.processes.len(), 2);
        assert_eq!(table.processes[0].cumulative_cpu(), 12);
        assert_eq!(table.processes[1].rss_pages, None);
    }

    #[test]
    fn test_static_table_missing_file_is_unavailable() {
        let dir = tempdir().expect("Failed to create temp dir");
        let err = StaticProcessTable::from_json_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.is_recoverable());
    }
}
