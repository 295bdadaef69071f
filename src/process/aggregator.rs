//! Process aggregation across samples.
//!
//! Groups processes running under the same command and sums their CPU and
//! memory usage. CPU is calculated **since the last run** and is a percentage
//! of the total CPU capacity (all processors) over that span, so the first
//! run reports 0% CPU for every group.
//!
//! A process that was not around last time is attributed its whole lifetime
//! CPU. For short-lived processes this overstates one sample; it is accurate
//! enough and avoids dropping new processes entirely.

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use super::record::{ProcessRecord, ProcessTableProvider};
use crate::clock::{system_clock, SharedClock, Timestamp};
use crate::error::{Result, SamplerError};

/// Number of groups in each ranked list unless configured otherwise.
pub const DEFAULT_TOP_N: usize = 10;

/// How the elapsed span between two runs is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuNormalization {
    /// Divide CPU ticks by the ticks elapsed on the provider's tick counter.
    #[default]
    Ticks,
    /// Convert CPU ticks to seconds and divide by elapsed clock seconds.
    WallClock,
}

impl FromStr for CpuNormalization {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ticks" | "jiffies" => Ok(CpuNormalization::Ticks),
            "wall_clock" | "wallclock" | "wall" => Ok(CpuNormalization::WallClock),
            other => Err(format!(
                "Invalid cpu normalization '{}', expected 'ticks' or 'wall_clock'",
                other
            )),
        }
    }
}

impl fmt::Display for CpuNormalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuNormalization::Ticks => f.write_str("ticks"),
            CpuNormalization::WallClock => f.write_str("wall_clock"),
        }
    }
}

/// Shape of the result returned by [`ProcessAggregator::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Two lists: top by memory and top by CPU.
    #[default]
    Ranked,
    /// Both lists merged and keyed by command.
    Union,
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ranked" => Ok(SelectionMode::Ranked),
            "union" => Ok(SelectionMode::Union),
            other => Err(format!(
                "Invalid selection mode '{}', expected 'ranked' or 'union'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorOptions {
    #[serde(default)]
    pub normalization: CpuNormalization,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub selection: SelectionMode,
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            normalization: CpuNormalization::default(),
            top_n: DEFAULT_TOP_N,
            selection: SelectionMode::default(),
        }
    }
}

/// Usage of all processes sharing a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedMetric {
    pub command: String,
    pub count: u32,
    /// Share of total CPU capacity since the last run, in percent.
    pub cpu_percent: f64,
    /// Resident memory in MB. Platforms without RSS contribute 0.
    pub memory_mb: f64,
    /// Distinct command lines, in first-seen order.
    pub cmdlines: Vec<String>,
}

impl GroupedMetric {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            count: 0,
            cpu_percent: 0.0,
            memory_mb: 0.0,
            cmdlines: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProcessSelection {
    Ranked {
        top_memory: Vec<GroupedMetric>,
        top_cpu: Vec<GroupedMetric>,
    },
    Union {
        processes: BTreeMap<String, GroupedMetric>,
    },
}

impl ProcessSelection {
    /// Look up a group by command in either shape.
    pub fn get(&self, command: &str) -> Option<&GroupedMetric> {
        match self {
            ProcessSelection::Ranked {
                top_memory,
                top_cpu,
            } => top_memory
                .iter()
                .chain(top_cpu.iter())
                .find(|g| g.command == command),
            ProcessSelection::Union { processes } => processes.get(command),
        }
    }
}

/// Cumulative CPU per pid as of the last run.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Snapshot {
    pub cpu: HashMap<u32, u64>,
    pub taken_at: Timestamp,
    pub ticks: u64,
}

impl Snapshot {
    fn from_records(records: &[ProcessRecord], taken_at: Timestamp, ticks: u64) -> Self {
        let cpu = records
            .iter()
            .map(|r| (r.pid, r.cumulative_cpu()))
            .collect();
        Self {
            cpu,
            taken_at,
            ticks,
        }
    }

    /// CPU ticks a process used since this snapshot.
    fn recent_cpu(&self, record: &ProcessRecord) -> u64 {
        let current = record.cumulative_cpu();
        match self.cpu.get(&record.pid) {
            Some(&previous) if current >= previous => current - previous,
            // New pid, or a pid reused by a process with less CPU so far
            _ => current,
        }
    }
}

/// Span between the previous snapshot and now, in normalization units.
#[derive(Debug, Clone, Copy)]
struct CpuWindow {
    elapsed_units: f64,
    /// CPU ticks per normalization unit.
    ticks_per_unit: f64,
}

impl CpuWindow {
    fn percent(&self, recent_ticks: u64, num_processors: u32) -> f64 {
        let used = recent_ticks as f64 / self.ticks_per_unit;
        let percent = (used / self.elapsed_units) * 100.0 / num_processors.max(1) as f64;
        // A near-zero window yields inf/NaN
        if percent.is_finite() {
            percent
        } else {
            0.0
        }
    }
}

/// Two-sample engine correlating process tables by pid.
pub struct ProcessAggregator<P> {
    provider: P,
    options: AggregatorOptions,
    clock: SharedClock,
    last: Option<Snapshot>,
    groups: Vec<GroupedMetric>,
}

impl<P: ProcessTableProvider> ProcessAggregator<P> {
    pub fn new(provider: P, options: AggregatorOptions) -> Self {
        Self::with_clock(provider, options, system_clock())
    }

    pub fn with_clock(provider: P, options: AggregatorOptions, clock: SharedClock) -> Self {
        Self {
            provider,
            options,
            clock,
            last: None,
            groups: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        provider: P,
        options: AggregatorOptions,
        clock: SharedClock,
        last: Option<Snapshot>,
    ) -> Self {
        Self {
            provider,
            options,
            clock,
            last,
            groups: Vec::new(),
        }
    }

    pub(crate) fn restore_snapshot(&mut self, last: Option<Snapshot>) {
        self.last = last;
        self.groups.clear();
    }

    /// True once a previous sample exists to diff against.
    pub fn is_warm(&self) -> bool {
        self.last.is_some()
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// All groups of the last run, in first-seen order.
    pub fn groups(&self) -> &[GroupedMetric] {
        &self.groups
    }

    pub(crate) fn snapshot(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    /// Sample the process table and return the selected groups.
    ///
    /// If the table can't be read the error is returned and the previous
    /// snapshot is kept, so the next successful run diffs against it.
    pub fn run(&mut self) -> Result<ProcessSelection> {
        if self.options.top_n == 0 {
            return Err(SamplerError::State("top_n must be at least 1".into()));
        }

        let records = self.provider.process_table()?;
        let now = self.clock.now();
        let ticks = self.provider.current_ticks(now)?;
        let tick_rate = self.provider.tick_rate();
        let num_processors = self.provider.num_processors();
        let page_size = self.provider.page_size();

        let window = self
            .last
            .as_ref()
            .and_then(|last| self.window_since(last, now, ticks, tick_rate));

        let groups = match (&self.last, window) {
            (Some(last), Some(window)) => group_records(&records, page_size, |record| {
                window.percent(last.recent_cpu(record), num_processors)
            }),
            _ => group_records(&records, page_size, |_| 0.0),
        };

        if self.last.is_none() {
            info!(
                processes = records.len(),
                groups = groups.len(),
                "First process sample taken, CPU available from next run"
            );
        } else {
            debug!(
                processes = records.len(),
                groups = groups.len(),
                cpu_window = window.is_some(),
                "Process sample taken"
            );
        }

        // Commit only after the whole computation succeeded
        self.last = Some(Snapshot::from_records(&records, now, ticks));
        self.groups = groups;

        Ok(self.select())
    }

    fn window_since(
        &self,
        last: &Snapshot,
        now: Timestamp,
        ticks: u64,
        tick_rate: f64,
    ) -> Option<CpuWindow> {
        match self.options.normalization {
            CpuNormalization::Ticks => {
                let elapsed_ticks = ticks.saturating_sub(last.ticks) as f64;
                if elapsed_ticks / tick_rate < 1.0 {
                    return None;
                }
                Some(CpuWindow {
                    elapsed_units: elapsed_ticks,
                    ticks_per_unit: 1.0,
                })
            }
            CpuNormalization::WallClock => {
                let elapsed = now - last.taken_at;
                if elapsed < 1.0 {
                    return None;
                }
                Some(CpuWindow {
                    elapsed_units: elapsed,
                    ticks_per_unit: tick_rate,
                })
            }
        }
    }

    /// Build the configured selection from the last run's groups.
    pub fn select(&self) -> ProcessSelection {
        select_groups(&self.groups, &self.options)
    }
}

/// Group records by command, in first-seen order.
fn group_records<F>(records: &[ProcessRecord], page_size: u64, cpu_percent: F) -> Vec<GroupedMetric>
where
    F: Fn(&ProcessRecord) -> f64,
{
    let mut groups: Vec<GroupedMetric> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let slot = *index.entry(record.command.as_str()).or_insert_with(|| {
            groups.push(GroupedMetric::new(&record.command));
            groups.len() - 1
        });
        let group = &mut groups[slot];

        group.count += 1;
        group.cpu_percent += cpu_percent(record);
        if let Some(pages) = record.rss_pages {
            group.memory_mb += (pages as f64 * page_size as f64) / 1024.0 / 1024.0;
        }
        if !group.cmdlines.contains(&record.cmdline) {
            group.cmdlines.push(record.cmdline.clone());
        }
    }

    groups
}

/// Top `n` groups by `key`, descending. Ties keep first-seen order.
fn top_by<K>(groups: &[GroupedMetric], n: usize, key: K) -> Vec<GroupedMetric>
where
    K: Fn(&GroupedMetric) -> f64,
{
    let mut ranked: Vec<&GroupedMetric> = groups.iter().collect();
    ranked.sort_by(|a, b| key(b).total_cmp(&key(a)));
    ranked.into_iter().take(n).cloned().collect()
}

pub fn select_groups(groups: &[GroupedMetric], options: &AggregatorOptions) -> ProcessSelection {
    let top_memory = top_by(groups, options.top_n, |g| g.memory_mb);
    let top_cpu = top_by(groups, options.top_n, |g| g.cpu_percent);

    match options.selection {
        SelectionMode::Ranked => ProcessSelection::Ranked {
            top_memory,
            top_cpu,
        },
        SelectionMode::Union => {
            let processes = top_memory
                .into_iter()
                .chain(top_cpu)
                .map(|g| (g.command.clone(), g))
                .collect();
            ProcessSelection::Union { processes }
        }
    }
}
