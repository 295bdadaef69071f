//! History file: the saved state of every collector, keyed by collector id.
//!
//! Each collector's state blob is itself JSON and is embedded as a value so
//! the file stays readable. Writes go to a temporary file that is renamed
//! over the old one, so a crash mid-write never leaves a truncated history.

use anyhow::Context;
use chrono::{DateTime, Utc};
use herakles_sampler::Collector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const HISTORY_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub collectors: BTreeMap<String, serde_json::Value>,
}

impl Default for History {
    fn default() -> Self {
        Self {
            version: HISTORY_VERSION,
            saved_at: None,
            collectors: BTreeMap::new(),
        }
    }
}

impl History {
    /// Load the history file. A missing file is an empty history.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!("No history file at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file {}", path.display()))?;
        let history: History = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse history file {}", path.display()))?;
        if history.version != HISTORY_VERSION {
            anyhow::bail!(
                "Unsupported history version {} in {}",
                history.version,
                path.display()
            );
        }
        Ok(history)
    }

    /// Write the history atomically.
    pub fn save(&mut self, path: &Path) -> anyhow::Result<()> {
        self.saved_at = Some(Utc::now());
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let tmp = path.with_extension("tmp");
        let content = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!(
            "Saved state of {} collectors to {}",
            self.collectors.len(),
            path.display()
        );
        Ok(())
    }

    /// Store the current state of `collector`.
    pub fn record(&mut self, collector: &dyn Collector) -> anyhow::Result<()> {
        let blob = collector.to_state()?;
        let value: serde_json::Value = serde_json::from_slice(&blob)?;
        self.collectors.insert(collector.id().to_string(), value);
        Ok(())
    }

    /// Store the state of every collector, skipping the ones that fail.
    pub fn record_all(&mut self, collectors: &[Box<dyn Collector>]) {
        for collector in collectors {
            if let Err(e) = self.record(collector.as_ref()) {
                warn!("Could not save state of {}: {}", collector.id(), e);
            }
        }
    }

    /// Restore `collector` from its saved state. Returns false when there is
    /// nothing saved for it.
    pub fn restore(&self, collector: &mut dyn Collector) -> anyhow::Result<bool> {
        let Some(value) = self.collectors.get(collector.id()) else {
            return Ok(false);
        };
        let blob = serde_json::to_vec(value)?;
        collector.restore(&blob)?;
        Ok(true)
    }

    /// Restore every collector that has saved state. Collectors whose state
    /// can't be restored start cold.
    pub fn restore_all(&self, collectors: &mut [Box<dyn Collector>]) {
        for collector in collectors.iter_mut() {
            match self.restore(collector.as_mut()) {
                Ok(true) => info!("Restored state of {}", collector.id()),
                Ok(false) => debug!("No saved state for {}", collector.id()),
                Err(e) => warn!("Starting {} cold, saved state rejected: {}", collector.id(), e),
            }
        }
    }
}
