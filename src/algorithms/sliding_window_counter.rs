use super::{Decision, RateLimitAlgorithm};
use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::storage::StorageBackend;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Sliding window counter rate limiter.
///
/// Approximates the sliding log with two fixed-window counters: the
/// previous window's count is weighted by how much of it still overlaps
/// the trailing window. O(1) memory per key, assuming prior-window
/// arrivals were uniformly distributed.
pub struct SlidingWindowCounter {
    config: LimiterConfig,
    backend: Arc<dyn StorageBackend>,
}

impl SlidingWindowCounter {
    pub fn new(config: LimiterConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self { config, backend }
    }
}

#[async_trait]
impl RateLimitAlgorithm for SlidingWindowCounter {
    fn kind(&self) -> Algorithm {
        Algorithm::SlidingWindowCounter
    }

    async fn check(&self, key: &str, now_ms: u64) -> Result<Decision> {
        let window = self.config.window_ms;
        let max_requests = self.config.max_requests;

        let window_start = now_ms - (now_ms % window);
        let current_key = format!("{key}:{window_start}");

        let current = self.backend.get(&current_key).await?.unwrap_or(0);
        // no previous window exists before the first one since epoch
        let previous = if window_start >= window {
            let previous_key = format!("{key}:{}", window_start - window);
            self.backend.get(&previous_key).await?.unwrap_or(0)
        } else {
            0
        };

        let position = (now_ms - window_start) as f64 / window as f64;
        let overlap = 1.0 - position;
        let estimated = (current as f64 + previous as f64 * overlap).floor() as u64;

        let allowed = estimated < max_requests as u64;
        if allowed {
            // TTL spans two windows so this counter is still readable as
            // the previous-window count after the boundary
            self.backend.increment(&current_key, window * 2).await?;
        }

        trace!(key, current, previous, estimated, allowed, "Sliding window counter check");

        let reset_at_secs = (window_start + window).div_ceil(1000);
        let current_count = estimated.min(u32::MAX as u64) as u32;
        let remaining = max_requests
            .saturating_sub(current_count)
            .saturating_sub(allowed as u32);

        if allowed {
            Ok(Decision::allow(
                max_requests,
                remaining,
                reset_at_secs,
                current_count,
            ))
        } else {
            let excess = estimated - max_requests as u64 + 1;
            let wait_ms = (excess as f64 * window as f64 / max_requests as f64).ceil() as u64;
            Ok(Decision::block(
                max_requests,
                reset_at_secs,
                wait_ms.div_ceil(1000),
                current_count,
            ))
        }
    }
}
