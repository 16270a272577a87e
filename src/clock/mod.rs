//! Time source abstraction for the decision algorithms.
//!
//! Algorithms never read system time directly; they receive `now` from the
//! clock the middleware was built with. Tests swap in [`ManualClock`] to get
//! fully deterministic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Thread-safe wall-clock source.
///
/// Returns milliseconds since the Unix epoch. Calls must be safe
/// concurrently (`Send + Sync`).
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in integer milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Default clock backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic clock for tests.
///
/// Starts at an arbitrary instant and only moves when told to. Clones share
/// the same underlying time, so a clock handed to a limiter can still be
/// advanced from the test body.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `start_millis`.
    pub fn new(start_millis: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.now_ms
            .fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute instant in milliseconds.
    pub fn set(&self, millis: u64) {
        self.now_ms.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
