use super::{Decision, RateLimitAlgorithm};
use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::storage::{QueueState, StorageBackend};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Leaking bucket rate limiter.
///
/// Arrivals accumulate in a bounded FIFO queue that drains at
/// `processing_rate` requests per second. A request that finds the queue
/// full is rejected. Produces a steady downstream load with no burst
/// allowance.
pub struct LeakingBucket {
    config: LimiterConfig,
    backend: Arc<dyn StorageBackend>,
}

impl LeakingBucket {
    pub fn new(config: LimiterConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self { config, backend }
    }
}

#[async_trait]
impl RateLimitAlgorithm for LeakingBucket {
    fn kind(&self) -> Algorithm {
        Algorithm::LeakingBucket
    }

    async fn check(&self, key: &str, now_ms: u64) -> Result<Decision> {
        let queue_size = self.config.queue_size();
        let rate = self.config.processing_rate();

        let mut state = self
            .backend
            .get_queue(key)
            .await?
            .unwrap_or(QueueState {
                arrivals_ms: Vec::new(),
                last_leak_ms: now_ms,
            });

        // Drain whole leaked slots; as with the token bucket refill, the
        // leak anchor only advances when something actually leaked.
        let elapsed = now_ms.saturating_sub(state.last_leak_ms);
        let leaked = ((elapsed as f64 / 1000.0) * rate).floor() as usize;
        if leaked > 0 {
            let drained = leaked.min(state.arrivals_ms.len());
            state.arrivals_ms.drain(..drained);
            state.last_leak_ms = now_ms;
        }

        let allowed = (state.arrivals_ms.len() as u32) < queue_size;
        if allowed {
            state.arrivals_ms.push(now_ms);
        }
        let depth = state.arrivals_ms.len() as u32;

        self.backend
            .set_queue(key, state, self.config.window_ms * 2)
            .await?;

        trace!(key, depth, allowed, "Leaking bucket check");

        let reset_at_ms = now_ms + ((depth as f64 / rate) * 1000.0).ceil() as u64;
        let reset_at_secs = reset_at_ms.div_ceil(1000);
        let remaining = queue_size.saturating_sub(depth);

        if allowed {
            Ok(Decision::allow(queue_size, remaining, reset_at_secs, depth))
        } else {
            Ok(Decision::block(
                queue_size,
                reset_at_secs,
                (1.0 / rate).ceil() as u64,
                depth,
            ))
        }
    }
}
