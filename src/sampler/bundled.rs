//! Sampler partitioned by bundle key.
//!
//! Used when a collector reports on an arbitrary number of instances (disks,
//! network interfaces). Each bundle owns its own output and memory; two
//! bundles with the same metric name never see each other's baselines.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use super::counter::{self, RateOptions};
use super::memory::MemoryStore;
use super::{canonical_name, MetricValue, Report};
use crate::clock::{system_clock, SharedClock, Timestamp};
use crate::error::Result;

/// Output of one bundled run: bundle key to that bundle's report.
pub type BundledReport = BTreeMap<String, Report>;

/// Concrete metric gathering logic driven by a [`BundledSampler`].
pub trait BundleSource {
    fn name(&self) -> &str;

    fn build_report(&mut self, sampler: &mut BundledSampler) -> Result<()>;
}

/// Bundle keys are only trimmed: device paths are case sensitive.
fn bundle_key(bundle: &str) -> String {
    bundle.trim().to_string()
}

pub struct BundledSampler {
    collector_id: String,
    output: BundledReport,
    memory: BTreeMap<String, MemoryStore>,
    clock: SharedClock,
}

impl BundledSampler {
    pub fn new(collector_id: impl Into<String>) -> Self {
        Self::with_clock(collector_id, system_clock())
    }

    pub fn with_clock(collector_id: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            collector_id: collector_id.into(),
            output: BundledReport::new(),
            memory: BTreeMap::new(),
            clock,
        }
    }

    pub(crate) fn from_parts(
        collector_id: String,
        memory: BTreeMap<String, MemoryStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            collector_id,
            output: BundledReport::new(),
            memory,
            clock,
        }
    }

    pub fn collector_id(&self) -> &str {
        &self.collector_id
    }

    /// Clear all bundle outputs, let `source` fill them, and return them.
    pub fn run<S: BundleSource + ?Sized>(&mut self, source: &mut S) -> Result<&BundledReport> {
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

    pub fn output(&self) -> &BundledReport {
        &self.output
    }

    pub fn report<I, K, V>(&mut self, bundle: &str, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<MetricValue>,
    {
        let report = self.output.entry(bundle_key(bundle)).or_default();
        for (name, value) in values {
            report.insert(canonical_name(name.as_ref()), value.into());
        }
    }

    pub fn report_value(&mut self, bundle: &str, name: &str, value: impl Into<MetricValue>) {
        self.output
            .entry(bundle_key(bundle))
            .or_default()
            .insert(canonical_name(name), value.into());
    }

    pub fn memory<T: DeserializeOwned>(&self, bundle: &str, name: &str) -> Option<T> {
        self.memory
            .get(&bundle_key(bundle))
            .and_then(|store| store.get(&canonical_name(name)))
    }

    pub fn memory_value(&self, bundle: &str, name: &str) -> Option<&serde_json::Value> {
        self.memory
            .get(&bundle_key(bundle))
            .and_then(|store| store.value(&canonical_name(name)))
    }

    pub fn remember<T: Serialize + ?Sized>(&mut self, bundle: &str, name: &str, value: &T) -> Result<()> {
        self.memory
            .entry(bundle_key(bundle))
            .or_default()
            .set(&canonical_name(name), value)
    }

    /// Rate of the cumulative counter `name` within `bundle`.
    pub fn counter(
        &mut self,
        bundle: &str,
        name: &str,
        value: f64,
        options: RateOptions,
    ) -> Result<Option<f64>> {
        self.counter_with(bundle, name, value, options, |last, current| current - last)
    }

    pub fn counter_with<F>(
        &mut self,
        bundle: &str,
        name: &str,
        value: f64,
        options: RateOptions,
        compute: F,
    ) -> Result<Option<f64>>
    where
        F: FnOnce(f64, f64) -> f64,
    {
        options.validate()?;
        let bundle = bundle_key(bundle);
        let name = canonical_name(name);
        let now = self.now();
        let store = self.memory.entry(bundle.clone()).or_default();
        let rate = counter::advance(store, &name, value, now, &options, compute)?;
        if let Some(rate) = rate {
            self.output
                .entry(bundle)
                .or_default()
                .insert(name, MetricValue::Number(rate));
        }
        Ok(rate)
    }

    /// Drop all memory of a bundle, e.g. a device that disappeared.
    pub fn forget_bundle(&mut self, bundle: &str) -> bool {
        self.memory.remove(&bundle_key(bundle)).is_some()
    }

    /// Bundles that currently hold memory.
    pub fn bundles(&self) -> impl Iterator<Item = &str> {
        self.memory.keys().map(String::as_str)
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn memory_stores(&self) -> &BTreeMap<String, MemoryStore> {
        &self.memory
    }
}

impl std::fmt::Debug for BundledSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundledSampler")
            .field("collector_id", &self.collector_id)
            .field("output", &self.output)
            .field("memory", &self.memory)
            .finish()
    }
}

impl<F> BundleSource for F
where
    F: FnMut(&mut BundledSampler) -> Result<()>,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn build_report(&mut self, sampler: &mut BundledSampler) -> Result<()> {
        self(sampler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_report_creates_bundles_lazily() {
        let mut sampler = BundledSampler::new("multi");
        let mut source = |s: &mut BundledSampler| -> Result<()> {
            s.report("alpha", [("capacity", 9.0)]);
            s.report("beta", [("capacity", 10.0)]);
            Ok(())
        };
        let out = sampler.run(&mut source).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["alpha"]["capacity"].as_f64(), Some(9.0));
        assert_eq!(out["beta"]["capacity"].as_f64(), Some(10.0));
    }

    #[test]
    fn test_memory_is_partitioned() {
        let mut sampler = BundledSampler::new("multi");
        sampler.remember("alpha", "val", &1u32).unwrap();
        sampler.remember("beta", "val", &100u32).unwrap();

        assert_eq!(sampler.memory::<u32>("alpha", "val"), Some(1));
        assert_eq!(sampler.memory::<u32>("beta", "val"), Some(100));
        assert_eq!(sampler.memory::<u32>("gamma", "val"), None);
    }

    #[test]
    fn test_counter_only_bundles_absent_on_first_run() {
        let clock = ManualClock::new(1000.0);
        let mut sampler = BundledSampler::with_clock("multi", Arc::new(clock.clone()));
        let mut value = 0.0;
        let mut source = |s: &mut BundledSampler| -> Result<()> {
            s.counter("alpha", "val", value, RateOptions::per_second())?;
            value += 500.0;
            Ok(())
        };

        assert!(sampler.run(&mut source).unwrap().is_empty());
        clock.advance(1.0);
        let out = sampler.run(&mut source).unwrap();
        assert_eq!(out["alpha"]["val"].as_f64(), Some(500.0));
    }

    #[test]
    fn test_forget_bundle() {
        let mut sampler = BundledSampler::new("multi");
        sampler
            .counter("eth0", "bytes_in", 1.0, RateOptions::per_second())
            .unwrap();
        assert_eq!(sampler.bundles().collect::<Vec<_>>(), vec!["eth0"]);
        assert!(sampler.forget_bundle("eth0"));
        assert_eq!(sampler.bundles().count(), 0);
    }
}
