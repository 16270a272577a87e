use super::{Decision, RateLimitAlgorithm};
use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::storage::StorageBackend;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Sliding window log rate limiter.
///
/// Keeps the exact timestamps of allowed requests and counts those in the
/// trailing window. Exact at the cost of O(`max_requests`) memory per
/// active key. Operates on the snapshot it reads; a concurrent writer can
/// skew a decision by at most one request per concurrent pair.
pub struct SlidingWindowLog {
    config: LimiterConfig,
    backend: Arc<dyn StorageBackend>,
}

impl SlidingWindowLog {
    pub fn new(config: LimiterConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self { config, backend }
    }
}

#[async_trait]
impl RateLimitAlgorithm for SlidingWindowLog {
    fn kind(&self) -> Algorithm {
        Algorithm::SlidingWindowLog
    }

    async fn check(&self, key: &str, now_ms: u64) -> Result<Decision> {
        let window = self.config.window_ms;
        let max_requests = self.config.max_requests;
        let window_start = now_ms.saturating_sub(window);

        self.backend
            .remove_old_timestamps(key, window_start)
            .await?;
        let timestamps = self.backend.get_timestamps(key, window_start).await?;
        let count = timestamps.len() as u32;

        let allowed = count < max_requests;
        if allowed {
            self.backend
                .add_timestamp(key, now_ms, window * 2)
                .await?;
        }

        trace!(key, count, allowed, "Sliding window log check");

        let remaining = max_requests
            .saturating_sub(count)
            .saturating_sub(allowed as u32);

        if allowed {
            Ok(Decision::allow(
                max_requests,
                remaining,
                (now_ms + window).div_ceil(1000),
                count,
            ))
        } else {
            // the window frees up when the oldest logged request ages out
            let oldest = timestamps.first().copied().unwrap_or(now_ms);
            Ok(Decision::block(
                max_requests,
                (oldest + window).div_ceil(1000),
                (oldest + window).saturating_sub(now_ms).div_ceil(1000),
                count,
            ))
        }
    }
}
