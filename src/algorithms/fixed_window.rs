use super::{Decision, RateLimitAlgorithm};
use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::storage::StorageBackend;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Fixed window rate limiter.
///
/// Time is partitioned into disjoint windows of `window_ms` aligned to
/// epoch zero, each with its own counter. Simple and cheap, but a client
/// straddling a boundary can emit up to twice the limit in less than one
/// window; use a sliding variant when that matters.
pub struct FixedWindow {
    config: LimiterConfig,
    backend: Arc<dyn StorageBackend>,
}

impl FixedWindow {
    pub fn new(config: LimiterConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self { config, backend }
    }
}

#[async_trait]
impl RateLimitAlgorithm for FixedWindow {
    fn kind(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    async fn check(&self, key: &str, now_ms: u64) -> Result<Decision> {
        let window = self.config.window_ms;
        let max_requests = self.config.max_requests;

        let window_start = now_ms - (now_ms % window);
        let counter_key = format!("{key}:{window_start}");

        let count = self.backend.increment(&counter_key, window).await?;
        let allowed = count <= max_requests as u64;

        trace!(key, count, allowed, "Fixed window check");

        let reset_at_ms = window_start + window;
        let reset_at_secs = reset_at_ms.div_ceil(1000);
        let current_count = count.min(u32::MAX as u64) as u32;
        let remaining = max_requests.saturating_sub(current_count);

        if allowed {
            Ok(Decision::allow(
                max_requests,
                remaining,
                reset_at_secs,
                current_count,
            ))
        } else {
            Ok(Decision::block(
                max_requests,
                reset_at_secs,
                (reset_at_ms - now_ms).div_ceil(1000),
                current_count,
            ))
        }
    }
}
