//! Counter/delta computation.
//!
//! A counter turns a cumulative reading into a rate by differencing it with
//! the baseline remembered from the previous call. The baseline is replaced
//! on every call, reported or not.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::memory::MemoryStore;
use crate::clock::Timestamp;
use crate::error::{Result, SamplerError};

/// Largest accepted rounding precision. Beyond this the scaled value loses
/// integer precision in an f64.
pub const MAX_ROUND_DIGITS: u32 = 12;

/// Minimum time between two samples for a rate to be reported, in seconds.
pub const MIN_ELAPSED_SECONDS: f64 = 1.0;

/// Time unit a counter rate is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateUnit {
    Second,
    Minute,
}

impl RateUnit {
    /// Factor applied to `delta / elapsed_seconds`.
    fn factor(self) -> f64 {
        match self {
            RateUnit::Second => 1.0,
            RateUnit::Minute => 60.0,
        }
    }
}

impl FromStr for RateUnit {
    type Err = SamplerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" => Ok(RateUnit::Second),
            "minute" => Ok(RateUnit::Minute),
            other => Err(SamplerError::UnsupportedRateUnit(other.to_string())),
        }
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateUnit::Second => f.write_str("second"),
            RateUnit::Minute => f.write_str("minute"),
        }
    }
}

/// Options for a single counter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateOptions {
    pub per: RateUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
}

impl RateOptions {
    pub fn per_second() -> Self {
        Self {
            per: RateUnit::Second,
            round: None,
        }
    }

    pub fn per_minute() -> Self {
        Self {
            per: RateUnit::Minute,
            round: None,
        }
    }

    /// Round reported values to `digits` decimal places.
    pub fn round(mut self, digits: u32) -> Self {
        self.round = Some(digits);
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.round {
            Some(digits) if digits > MAX_ROUND_DIGITS => Err(SamplerError::InvalidRounding(digits)),
            _ => Ok(()),
        }
    }

    /// Scale a raw delta observed over `elapsed` seconds and apply rounding.
    fn apply(&self, raw_delta: f64, elapsed: f64) -> f64 {
        let rate = raw_delta / elapsed * self.per.factor();
        match self.round {
            Some(digits) => round_to(rate, digits),
            None => rate,
        }
    }
}

impl Default for RateOptions {
    fn default() -> Self {
        Self::per_second()
    }
}

/// Round half away from zero on the scaled value.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// A remembered `(time, cumulative value)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub time: Timestamp,
    pub value: f64,
}

/// Advance the counter `name` stored in `memory` to `value` observed at `now`.
///
/// Returns the rate to report, if any. The baseline is replaced whenever the
/// options are valid and the reading is finite.
pub(crate) fn advance<F>(
    memory: &mut MemoryStore,
    name: &str,
    value: f64,
    now: Timestamp,
    options: &RateOptions,
    compute: F,
) -> Result<Option<f64>>
where
    F: FnOnce(f64, f64) -> f64,
{
    options.validate()?;

    if !value.is_finite() {
        debug!(counter = name, "Ignoring non-finite counter reading");
        return Ok(None);
    }

    let rate = match memory.baseline(name) {
        None => None,
        Some(last) if value < last.value => {
            debug!(
                counter = name,
                last = last.value,
                value, "Counter decreased, treating as reset"
            );
            None
        }
        Some(last) => {
            let elapsed = now - last.time;
            if elapsed < MIN_ELAPSED_SECONDS {
                None
            } else {
                Some(options.apply(compute(last.value, value), elapsed))
            }
        }
    };

    memory.set_baseline(name, Baseline { time: now, value });
    Ok(rate)
}
