//! Persistence of sampler state across process restarts.
//!
//! Every blob is a JSON envelope `{version, kind, body}`. Only memory and
//! snapshots are stored; output maps are rebuilt by every run, so a restored
//! instance behaves exactly like the one that was saved.

use ahash::AHashMap as HashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::clock::{system_clock, SharedClock, Timestamp};
use crate::error::{Result, SamplerError};
use crate::process::aggregator::Snapshot;
use crate::process::{AggregatorOptions, ProcessAggregator, ProcessTableProvider};
use crate::sampler::{BundledSampler, MemoryStore, Sampler};

/// Version written into every envelope.
pub const STATE_VERSION: u32 = 1;

pub const KIND_SAMPLER: &str = "sampler";
pub const KIND_BUNDLED: &str = "bundled";
pub const KIND_PROCESSES: &str = "processes";

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    kind: String,
    body: T,
}

fn encode<T: Serialize>(kind: &str, body: &T) -> Result<Vec<u8>> {
    let envelope = Envelope {
        version: STATE_VERSION,
        kind: kind.to_string(),
        body,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn decode<T: DeserializeOwned>(kind: &str, blob: &[u8]) -> Result<T> {
    let envelope: Envelope<serde_json::Value> = serde_json::from_slice(blob)?;
    if envelope.version != STATE_VERSION {
        return Err(SamplerError::State(format!(
            "unsupported state version {} (expected {})",
            envelope.version, STATE_VERSION
        )));
    }
    if envelope.kind != kind {
        return Err(SamplerError::State(format!(
            "expected '{}' state, found '{}'",
            kind, envelope.kind
        )));
    }
    Ok(serde_json::from_value(envelope.body)?)
}

/// Kind recorded in a blob, without decoding the body.
pub fn state_kind(blob: &[u8]) -> Result<String> {
    let envelope: Envelope<serde_json::Value> = serde_json::from_slice(blob)?;
    Ok(envelope.kind)
}

#[derive(Serialize, Deserialize)]
struct SamplerBody {
    collector_id: String,
    #[serde(default)]
    memory: MemoryStore,
}

#[derive(Serialize, Deserialize)]
struct BundledBody {
    collector_id: String,
    #[serde(default)]
    memory: BTreeMap<String, MemoryStore>,
}

#[derive(Serialize, Deserialize)]
struct ProcessesBody {
    options: AggregatorOptions,
    #[serde(default)]
    last_snapshot: Option<BTreeMap<u32, u64>>,
    #[serde(default)]
    last_run: Option<Timestamp>,
    #[serde(default)]
    last_ticks: Option<u64>,
}

impl Sampler {
    pub fn to_state(&self) -> Result<Vec<u8>> {
        encode(
            KIND_SAMPLER,
            &SamplerBody {
                collector_id: self.collector_id().to_string(),
                memory: self.memory_store().clone(),
            },
        )
    }

    pub fn from_state(blob: &[u8]) -> Result<Self> {
        Self::from_state_with_clock(blob, system_clock())
    }

    pub fn from_state_with_clock(blob: &[u8], clock: SharedClock) -> Result<Self> {
        let body: SamplerBody = decode(KIND_SAMPLER, blob)?;
        debug!(collector = %body.collector_id, "Restored sampler state");
        Ok(Sampler::from_parts(body.collector_id, body.memory, clock))
    }
}

impl BundledSampler {
    pub fn to_state(&self) -> Result<Vec<u8>> {
        encode(
            KIND_BUNDLED,
            &BundledBody {
                collector_id: self.collector_id().to_string(),
                memory: self.memory_stores().clone(),
            },
        )
    }

    pub fn from_state(blob: &[u8]) -> Result<Self> {
        Self::from_state_with_clock(blob, system_clock())
    }

    pub fn from_state_with_clock(blob: &[u8], clock: SharedClock) -> Result<Self> {
        let body: BundledBody = decode(KIND_BUNDLED, blob)?;
        debug!(
            collector = %body.collector_id,
            bundles = body.memory.len(),
            "Restored bundled sampler state"
        );
        Ok(BundledSampler::from_parts(body.collector_id, body.memory, clock))
    }
}

impl<P: ProcessTableProvider> ProcessAggregator<P> {
    pub fn to_state(&self) -> Result<Vec<u8>> {
        let snapshot = self.snapshot();
        encode(
            KIND_PROCESSES,
            &ProcessesBody {
                options: *self.options(),
                last_snapshot: snapshot.map(|s| s.cpu.iter().map(|(&pid, &cpu)| (pid, cpu)).collect()),
                last_run: snapshot.map(|s| s.taken_at),
                last_ticks: snapshot.map(|s| s.ticks),
            },
        )
    }

    /// Restore an aggregator around `provider`. The options are taken from
    /// the blob.
    pub fn from_state(blob: &[u8], provider: P) -> Result<Self> {
        Self::from_state_with_clock(blob, provider, system_clock())
    }

    pub fn from_state_with_clock(blob: &[u8], provider: P, clock: SharedClock) -> Result<Self> {
        let (options, last) = decode_processes(blob)?;
        Ok(ProcessAggregator::from_parts(provider, options, clock, last))
    }

    /// Replace the snapshot of this aggregator with a saved state. The
    /// configured options are kept.
    pub fn restore_state(&mut self, blob: &[u8]) -> Result<()> {
        let (_, last) = decode_processes(blob)?;
        self.restore_snapshot(last);
        Ok(())
    }
}

fn decode_processes(blob: &[u8]) -> Result<(AggregatorOptions, Option<Snapshot>)> {
    let body: ProcessesBody = decode(KIND_PROCESSES, blob)?;
    // A partial snapshot can't be diffed against, so it restores COLD
    let last = match (body.last_snapshot, body.last_run, body.last_ticks) {
        (Some(cpu), Some(taken_at), Some(ticks)) => Some(Snapshot {
            cpu: cpu.into_iter().collect::<HashMap<u32, u64>>(),
            taken_at,
            ticks,
        }),
        _ => None,
    };
    debug!(warm = last.is_some(), "Restored process aggregator state");
    Ok((body.options, last))
}
