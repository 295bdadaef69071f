//! Host collectors built on the samplers.
//!
//! This module contains the raw readers for `/proc` files (diskstats,
//! mounts, net/dev, meminfo, stat, loadavg) and the collectors turning them
//! into reports. [`Collector`] is the uniform interface the scheduler drives:
//! run once per interval, save state, restore state.

pub mod cpu;
pub mod disk;
pub mod diskstats;
pub mod filesystem;
pub mod meminfo;
pub mod netdev;

pub use cpu::CpuCollector;
pub use disk::DiskCollector;
pub use meminfo::MemoryCollector;
pub use netdev::NetworkCollector;

use std::fs;
use std::path::Path;

use crate::clock::{system_clock, SharedClock};
use crate::error::{Result, SamplerError};
use crate::process::{ProcessAggregator, ProcessTableProvider};
use crate::sampler::{BundleSource, BundledSampler, MetricSource, Sampler};

/// Read a `/proc` file, mapping failures to an unavailable reading.
pub(crate) fn read_proc_file(family: &str, path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| SamplerError::unavailable(family, format!("{}: {}", path.display(), e)))
}

/// A collector the scheduler can run and persist.
pub trait Collector: Send {
    /// Stable id, also the key of the collector's persisted state.
    fn id(&self) -> &str;

    /// Run once and return the report as JSON.
    fn collect(&mut self) -> Result<serde_json::Value>;

    fn to_state(&self) -> Result<Vec<u8>>;

    /// Replace memory with a previously saved state of the same collector.
    fn restore(&mut self, blob: &[u8]) -> Result<()>;
}

fn check_id(expected: &str, found: &str) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(SamplerError::State(format!(
            "state belongs to collector '{}', not '{}'",
            found, expected
        )))
    }
}

/// A [`MetricSource`] paired with its own [`Sampler`].
pub struct SamplerJob<S> {
    source: S,
    sampler: Sampler,
    clock: SharedClock,
}

impl<S: MetricSource> SamplerJob<S> {
    pub fn new(id: impl Into<String>, source: S) -> Self {
        Self::with_clock(id, source, system_clock())
    }

    pub fn with_clock(id: impl Into<String>, source: S, clock: SharedClock) -> Self {
        Self {
            source,
            sampler: Sampler::with_clock(id, clock.clone()),
            clock,
        }
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }
}

impl<S: MetricSource + Send> Collector for SamplerJob<S> {
    fn id(&self) -> &str {
        self.sampler.collector_id()
    }

    fn collect(&mut self) -> Result<serde_json::Value> {
        let report = self.sampler.run(&mut self.source)?;
        Ok(serde_json::to_value(report)?)
    }

    fn to_state(&self) -> Result<Vec<u8>> {
        self.sampler.to_state()
    }

    fn restore(&mut self, blob: &[u8]) -> Result<()> {
        let restored = Sampler::from_state_with_clock(blob, self.clock.clone())?;
        check_id(self.sampler.collector_id(), restored.collector_id())?;
        self.sampler = restored;
        Ok(())
    }
}

/// A [`BundleSource`] paired with its own [`BundledSampler`].
pub struct BundledJob<S> {
    source: S,
    sampler: BundledSampler,
    clock: SharedClock,
}

impl<S: BundleSource> BundledJob<S> {
    pub fn new(id: impl Into<String>, source: S) -> Self {
        Self::with_clock(id, source, system_clock())
    }

    pub fn with_clock(id: impl Into<String>, source: S, clock: SharedClock) -> Self {
        Self {
            source,
            sampler: BundledSampler::with_clock(id, clock.clone()),
            clock,
        }
    }

    pub fn sampler(&self) -> &BundledSampler {
        &self.sampler
    }
}

impl<S: BundleSource + Send> Collector for BundledJob<S> {
    fn id(&self) -> &str {
        self.sampler.collector_id()
    }

    fn collect(&mut self) -> Result<serde_json::Value> {
        let report = self.sampler.run(&mut self.source)?;
        Ok(serde_json::to_value(report)?)
    }

    fn to_state(&self) -> Result<Vec<u8>> {
        self.sampler.to_state()
    }

    fn restore(&mut self, blob: &[u8]) -> Result<()> {
        let restored = BundledSampler::from_state_with_clock(blob, self.clock.clone())?;
        check_id(self.sampler.collector_id(), restored.collector_id())?;
        self.sampler = restored;
        Ok(())
    }
}

/// The process aggregator under a collector id.
pub struct ProcessJob<P> {
    id: String,
    aggregator: ProcessAggregator<P>,
}

impl<P: ProcessTableProvider> ProcessJob<P> {
    pub fn new(id: impl Into<String>, aggregator: ProcessAggregator<P>) -> Self {
        Self {
            id: id.into(),
            aggregator,
        }
    }

    pub fn aggregator(&self) -> &ProcessAggregator<P> {
        &self.aggregator
    }
}

impl<P: ProcessTableProvider + Send> Collector for ProcessJob<P> {
    fn id(&self) -> &str {
        &self.id
    }

    fn collect(&mut self) -> Result<serde_json::Value> {
        let selection = self.aggregator.run()?;
        Ok(serde_json::to_value(selection)?)
    }

    fn to_state(&self) -> Result<Vec<u8>> {
        self.aggregator.to_state()
    }

    fn restore(&mut self, blob: &[u8]) -> Result<()> {
        self.aggregator.restore_state(blob)
    }
}
