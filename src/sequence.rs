//! Sequence Generator
//!
//! Hands out strictly increasing logical timestamps. The wall clock in
//! nanoseconds is the base; an atomic floor guarantees uniqueness when the
//! clock is coarse or steps backwards.
//!
//! One generator is owned by an engine and shared (via `Arc`) with anything
//! whose timestamps must be comparable with the engine's, such as
//! transaction overlays.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic timestamp source
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: AtomicI64,
}

impl SequenceGenerator {
    /// Create a generator with no floor
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose first value is greater than `floor`
    pub fn starting_after(floor: i64) -> Self {
        Self {
            last: AtomicI64::new(floor.max(0)),
        }
    }

    /// Next timestamp: `max(last + 1, now)`, always positive
    pub fn next(&self) -> i64 {
        let now = wall_clock_nanos();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current.saturating_add(1));
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }

    /// Raise the floor so later values exceed `timestamp`
    pub fn observe(&self, timestamp: i64) {
        self.last.fetch_max(timestamp.saturating_abs(), Ordering::AcqRel);
    }

    /// Most recently issued (or observed) value
    pub fn last(&self) -> i64 {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_clock_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(1)
}
