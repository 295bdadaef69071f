//! Generic stateful samplers.
//!
//! This module provides:
//! - `Sampler`: one namespace of metrics with its own memory
//! - `BundledSampler`: the same, partitioned by bundle key (device, interface)
//! - `counter`: rate computation from cumulative readings
//! - `memory`: the remembered state carried between runs
//!
//! A concrete collector implements [`MetricSource`] (or [`BundleSource`]) and
//! is driven by the sampler's `run`. Output is rebuilt empty on every run;
//! only memory survives.

pub mod bundled;
pub mod counter;
pub mod memory;

pub use bundled::{BundleSource, BundledReport, BundledSampler};
pub use counter::{round_to, Baseline, RateOptions, RateUnit, MAX_ROUND_DIGITS};
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::clock::{system_clock, SharedClock, Timestamp};
use crate::error::{Result, SamplerError};

/// A single reported value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Number(_) => None,
            MetricValue::Text(s) => Some(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Number(v as f64)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Number(v as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// Output of one run: metric name to value.
pub type Report = BTreeMap<String, MetricValue>;

/// Canonical form of a metric name: trimmed, lowercase, spaces become `_`
/// and `%` becomes `percent`.
///
/// ```
/// use herakles_sampler::sampler::canonical_name;
/// assert_eq!(canonical_name("Bytes in"), "bytes_in");
/// assert_eq!(canonical_name("Use%"), "usepercent");
/// ```
pub fn canonical_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "_")
        .replace('%', "percent")
}

/// Concrete metric gathering logic driven by a [`Sampler`].
pub trait MetricSource {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Gather readings and feed them to the sampler via `report`,
    /// `remember` and `counter`.
    fn build_report(&mut self, sampler: &mut Sampler) -> Result<()>;
}

/// Single-namespace counter/delta engine.
pub struct Sampler {
    collector_id: String,
    output: Report,
    memory: MemoryStore,
    clock: SharedClock,
}

impl Sampler {
    pub fn new(collector_id: impl Into<String>) -> Self {
        Self::with_clock(collector_id, system_clock())
    }

    pub fn with_clock(collector_id: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            collector_id: collector_id.into(),
            output: Report::new(),
            memory: MemoryStore::default(),
            clock,
        }
    }

    pub(crate) fn from_parts(collector_id: String, memory: MemoryStore, clock: SharedClock) -> Self {
        Self {
            collector_id,
            output: Report::new(),
            memory,
            clock,
        }
    }

    pub fn collector_id(&self) -> &str {
        &self.collector_id
    }

    /// Clear the output, let `source` fill it, and return it.
    ///
    /// Unavailable readings only shorten the output; configuration errors
    /// are returned.
    pub fn run<S: MetricSource + ?Sized>(&mut self, source: &mut S) -> Result<&Report> {
        self.output.clear();
        if let Err(e) = source.build_report(self) {
            if !e.is_recoverable() {
                return Err(e);
            }
            warn!(
                collector = %self.collector_id,
                source = source.name(),
                error = %e,
                "Readings unavailable, omitting from this run"
            );
        }
        Ok(&self.output)
    }

    /// Output of the current (or last) run.
    pub fn output(&self) -> &Report {
        &self.output
    }

    /// Merge name/value pairs into the output. Last write wins.
    pub fn report<I, K, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<MetricValue>,
    {
        for (name, value) in values {
            self.output
                .insert(canonical_name(name.as_ref()), value.into());
        }
    }

    pub fn report_value(&mut self, name: &str, value: impl Into<MetricValue>) {
        self.output.insert(canonical_name(name), value.into());
    }

    /// Remembered value for `name`, if any.
    pub fn memory<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.memory.get(&canonical_name(name))
    }

    pub fn memory_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.memory.value(&canonical_name(name))
    }

    pub fn remember<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        self.memory.set(&canonical_name(name), value)
    }

    pub fn forget(&mut self, name: &str) -> bool {
        self.memory.forget(&canonical_name(name))
    }

    /// Report the rate of the cumulative counter `name`.
    ///
    /// Returns the reported value, or `None` when this call only set the
    /// baseline (first sample, reset, or less than a second elapsed).
    pub fn counter(&mut self, name: &str, value: f64, options: RateOptions) -> Result<Option<f64>> {
        self.counter_with(name, value, options, |last, current| current - last)
    }

    /// Like [`Sampler::counter`] with a custom delta: `compute(last, current)`.
    pub fn counter_with<F>(
        &mut self,
        name: &str,
        value: f64,
        options: RateOptions,
        compute: F,
    ) -> Result<Option<f64>>
    where
        F: FnOnce(f64, f64) -> f64,
    {
        let name = canonical_name(name);
        let now = self.now();
        let rate = counter::advance(&mut self.memory, &name, value, now, &options, compute)?;
        if let Some(rate) = rate {
            self.output.insert(name, MetricValue::Number(rate));
        }
        Ok(rate)
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn memory_store(&self) -> &MemoryStore {
        &self.memory
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("collector_id", &self.collector_id)
            .field("output", &self.output)
            .field("memory", &self.memory)
            .finish()
    }
}

/// Closures can act as one-off sources.
impl<F> MetricSource for F
where
    F: FnMut(&mut Sampler) -> Result<()>,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn build_report(&mut self, sampler: &mut Sampler) -> Result<()> {
        self(sampler)
    }
}

/// Turn an unsupported platform into an unavailable reading.
pub(crate) fn require_procfs(family: &str, platform: crate::platform::Platform) -> Result<()> {
    if platform.has_procfs() {
        Ok(())
    } else {
        Err(SamplerError::unavailable(
            family,
            format!("platform '{}' is not supported", platform),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name(" Packets out "), "packets_out");
        assert_eq!(canonical_name("Used Percent"), "used_percent");
        assert_eq!(canonical_name("%iused"), "percentiused");
    }

    #[test]
    fn test_report_last_write_wins() {
        let mut sampler = Sampler::new("test");
        let mut source = |s: &mut Sampler| -> Result<()> {
            s.report([("capacity", 9.0)]);
            s.report([("Capacity", 10.0)]);
            Ok(())
        };
        let out = sampler.run(&mut source).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["capacity"], MetricValue::Number(10.0));
    }

    #[test]
    fn test_remembered_values() {
        let mut sampler = Sampler::new("test");
        assert_eq!(sampler.memory::<u64>("seen"), None);
        sampler.remember("Seen", &3u64).unwrap();
        assert_eq!(sampler.memory::<u64>("seen"), Some(3));
        assert_eq!(sampler.memory_value("seen"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn test_recoverable_error_keeps_partial_output() {
        let mut sampler = Sampler::new("test");
        let mut source = |s: &mut Sampler| -> Result<()> {
            s.report_value("size", 100u64);
            Err(SamplerError::unavailable("memory", "file absent"))
        };
        let out = sampler.run(&mut source).unwrap();
        assert_eq!(out["size"].as_f64(), Some(100.0));
    }

    #[test]
    fn test_configuration_error_is_returned() {
        let clock = ManualClock::new(0.0);
        let mut sampler = Sampler::with_clock("test", Arc::new(clock));
        let mut source = |s: &mut Sampler| -> Result<()> {
            s.counter("x", 1.0, RateOptions::per_second().round(99))?;
            Ok(())
        };
        assert!(matches!(
            sampler.run(&mut source),
            Err(SamplerError::InvalidRounding(99))
        ));
    }

    #[test]
    fn test_require_procfs() {
        use crate::platform::Platform;
        assert!(require_procfs("disk", Platform::Linux).is_ok());
        let err = require_procfs("disk", Platform::Darwin).unwrap_err();
        assert!(err.is_recoverable());
    }
}
