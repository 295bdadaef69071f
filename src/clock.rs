//! Time sources for samplers.
//!
//! Samplers never read the system time directly; they ask a [`Clock`]. The
//! default is [`SystemClock`]. Tests drive [`ManualClock`] to control elapsed
//! time without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Seconds since the UNIX epoch.
pub type Timestamp = f64;

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: Arc::new(AtomicI64::new((start * 1_000_000.0) as i64)),
        }
    }

    /// Move the clock forward by `seconds` (fractions allowed).
    pub fn advance(&self, seconds: f64) {
        self.micros
            .fetch_add((seconds * 1_000_000.0) as i64, Ordering::SeqCst);
    }

    pub fn set(&self, now: Timestamp) {
        self.micros
            .store((now * 1_000_000.0) as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// The default clock used by samplers built without an explicit one.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
