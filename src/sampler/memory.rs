//! Per-sampler memory that survives between runs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::counter::Baseline;
use crate::error::Result;

/// Remembered state of one sampler namespace (or one bundle).
///
/// Counter baselines and free-form values are kept apart so a counter can
/// never clobber a remembered value of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    counters: BTreeMap<String, Baseline>,
    #[serde(default)]
    values: BTreeMap<String, serde_json::Value>,
}

impl MemoryStore {
    pub fn baseline(&self, name: &str) -> Option<Baseline> {
        self.counters.get(name).copied()
    }

    pub fn set_baseline(&mut self, name: &str, baseline: Baseline) {
        self.counters.insert(name.to_string(), baseline);
    }

    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }

    /// Remembered value decoded as `T`. A value of another shape reads as absent.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self.values.get(name)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(name, error = %e, "Remembered value has unexpected shape");
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        self.values
            .insert(name.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Drop a remembered value and any counter baseline of the same name.
    pub fn forget(&mut self, name: &str) -> bool {
        let had_value = self.values.remove(name).is_some();
        let had_counter = self.counters.remove(name).is_some();
        had_value || had_counter
    }

    pub fn clear(&mut self) {
        self.counters.clear();
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.values.is_empty()
    }

    pub fn counter_names(&self) -> impl Iterator<Item = &str> {
        self.counters.keys().map(String::as_str)
    }
}
