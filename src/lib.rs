//! Herakles Sampler Library
//!
//! The sampling core of a host-metrics agent: stateful samplers turning
//! repeated raw OS readings (cumulative counters, process tables, interface
//! byte counts) into rates, percentages and ranked snapshots, with state that
//! survives process restarts.
//!
//! # Features
//!
//! - **Counters**: per-second or per-minute rates with reset detection
//! - **Bundles**: the same engine partitioned per device or interface
//! - **Processes**: CPU since last run grouped by command, top-N selection
//! - **State**: JSON round trip of all memory for restarts
//!
//! # Usage
//!
//! ```rust
//! use herakles_sampler::sampler::{RateOptions, Sampler};
//! use herakles_sampler::Result;
//!
//! let mut sampler = Sampler::new("requests");
//! let mut total = 0.0;
//! let mut source = |s: &mut Sampler| -> Result<()> {
//!     total += 120.0;
//!     s.counter("Requests", total, RateOptions::per_minute())?;
//!     Ok(())
//! };
//!
//! // The first run only records a baseline
//! assert!(sampler.run(&mut source)?.is_empty());
//!
//! // State can be saved and restored across restarts
//! let blob = sampler.to_state()?;
//! let restored = Sampler::from_state(&blob)?;
//! assert_eq!(restored.collector_id(), "requests");
//! # Ok::<(), herakles_sampler::SamplerError>(())
//! ```

pub mod clock;
pub mod collectors;
pub mod error;
pub mod platform;
pub mod process;
pub mod sampler;
pub mod state;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, Timestamp};
pub use collectors::Collector;
pub use error::{Result, SamplerError};
pub use platform::Platform;
pub use process::{AggregatorOptions, ProcessAggregator, ProcessSelection};
pub use sampler::{BundledSampler, RateOptions, Sampler};
