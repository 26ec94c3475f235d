//! Deterministic fakes shared by other crates' test suites, mirroring this
//! crate's own `SequentialIdGen` pattern: production code gets randomness
//! and wall-clock time, tests get a predictable substitute behind the same
//! trait.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Supplies `DateTime<Utc>::now()` through a seam so tests get strictly
/// increasing, deterministic timestamps instead of wall-clock jitter.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Ticks forward by one second on every call, starting from a fixed epoch.
#[derive(Debug)]
pub struct FakeClock {
    next_secs: AtomicI64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            next_secs: AtomicI64::new(1_700_000_000),
        }
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.next_secs.fetch_add(1, Ordering::Relaxed);
        Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
    }
}
