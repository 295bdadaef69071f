//! Process table sampling.
//!
//! This module provides:
//! - `record`: process rows and the `ProcessTableProvider` trait
//! - `procfs`: the Linux `/proc` provider
//! - `aggregator`: CPU since last run, grouping by command and top-N selection

pub mod aggregator;
pub mod procfs;
pub mod record;

// Re-export commonly used types
pub use aggregator::{
    select_groups, AggregatorOptions, CpuNormalization, GroupedMetric, ProcessAggregator,
    ProcessSelection, SelectionMode, DEFAULT_TOP_N,
};
pub use procfs::{parse_pid_stat, ProcfsProcessTable, CLK_TCK, PAGE_SIZE};
pub use record::{ProcessRecord, ProcessTableProvider, StaticProcessTable};
