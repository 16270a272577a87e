//! The five rate limiting decision procedures.
//!
//! Each algorithm is stateless: per-key state lives in the storage backend,
//! and a decision is a pure function of `(key, now)` over that state. No
//! algorithm holds a lock across a decision; correctness rests on the
//! backend's single-key atomicity.
//!
//! - **Token bucket**: burst up to capacity, smooth long-term rate
//! - **Leaking bucket**: bounded FIFO queue drained at a fixed rate
//! - **Fixed window**: epoch-aligned windows, one counter each
//! - **Sliding window log**: exact trailing-window count
//! - **Sliding window counter**: weighted two-window estimate

pub mod fixed_window;
pub mod leaking_bucket;
pub mod sliding_window_counter;
pub mod sliding_window_log;
pub mod token_bucket;

use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::storage::StorageBackend;
use async_trait::async_trait;
use std::sync::Arc;

pub use fixed_window::FixedWindow;
pub use leaking_bucket::LeakingBucket;
pub use sliding_window_counter::SlidingWindowCounter;
pub use sliding_window_log::SlidingWindowLog;
pub use token_bucket::TokenBucket;

/// Per-request decision returned by every algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Effective capacity reported to the client
    pub limit: u32,
    /// Requests left before the limit bites; 0 when blocked
    pub remaining: u32,
    /// Unix seconds at which the client regains full capacity
    pub reset_at_secs: u64,
    /// Seconds to wait before retrying; present only when blocked, never 0
    pub retry_after_secs: Option<u64>,
    /// Observed load, exact or estimated depending on the algorithm
    pub current_count: u32,
}

impl Decision {
    /// Create an allowed decision
    pub fn allow(limit: u32, remaining: u32, reset_at_secs: u64, current_count: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at_secs,
            retry_after_secs: None,
            current_count,
        }
    }

    /// Create a blocked decision; `retry_after_secs` is clamped to >= 1
    pub fn block(limit: u32, reset_at_secs: u64, retry_after_secs: u64, current_count: u32) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at_secs,
            retry_after_secs: Some(retry_after_secs.max(1)),
            current_count,
        }
    }
}

/// A rate limiting decision procedure over a storage backend.
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync {
    /// The algorithm id this instance implements.
    fn kind(&self) -> Algorithm;

    /// Decide whether the request identified by `key` at `now_ms`
    /// (milliseconds since epoch) is allowed, updating backend state.
    async fn check(&self, key: &str, now_ms: u64) -> Result<Decision>;
}

/// Build an algorithm instance from a validated configuration.
///
/// This is the registry the middleware factory uses to produce instances
/// uniformly from an algorithm id.
pub fn build_algorithm(
    config: &LimiterConfig,
    backend: Arc<dyn StorageBackend>,
) -> Result<Arc<dyn RateLimitAlgorithm>> {
    config.validate()?;

    Ok(match config.algorithm {
        Algorithm::TokenBucket => Arc::new(TokenBucket::new(config.clone(), backend)),
        Algorithm::LeakingBucket => Arc::new(LeakingBucket::new(config.clone(), backend)),
        Algorithm::FixedWindow => Arc::new(FixedWindow::new(config.clone(), backend)),
        Algorithm::SlidingWindowLog => Arc::new(SlidingWindowLog::new(config.clone(), backend)),
        Algorithm::SlidingWindowCounter => {
            Arc::new(SlidingWindowCounter::new(config.clone(), backend))
        }
    })
}
