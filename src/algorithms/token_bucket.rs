use super::{Decision, RateLimitAlgorithm};
use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::storage::{BucketState, StorageBackend};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Token bucket rate limiter.
///
/// A bucket of capacity `bucket_size` gains `refill_rate` tokens every
/// `refill_interval_ms`, capped at capacity; each request consumes one
/// token. Allows bursts of up to the full capacity after an idle period
/// while smoothing to the refill rate long-term.
pub struct TokenBucket {
    config: LimiterConfig,
    backend: Arc<dyn StorageBackend>,
}

impl TokenBucket {
    pub fn new(config: LimiterConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self { config, backend }
    }
}

#[async_trait]
impl RateLimitAlgorithm for TokenBucket {
    fn kind(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    async fn check(&self, key: &str, now_ms: u64) -> Result<Decision> {
        let bucket_size = self.config.bucket_size();
        let refill_rate = self.config.refill_rate();
        let refill_interval = self.config.refill_interval_ms();

        // The bucket starts full, so the first request is always allowed.
        let mut state = self.backend.get_bucket(key).await?.unwrap_or(BucketState {
            tokens: bucket_size as f64,
            last_refill_ms: now_ms,
        });

        // Whole elapsed intervals only; `last_refill_ms` advances solely
        // when tokens were added, so sub-interval fractions carry over to
        // the next call instead of being silently dropped.
        let elapsed = now_ms.saturating_sub(state.last_refill_ms);
        let added = (elapsed / refill_interval) as f64 * refill_rate;
        if added > 0.0 {
            state.tokens = (state.tokens + added).min(bucket_size as f64);
            state.last_refill_ms = now_ms;
        }

        let allowed = state.tokens >= 1.0;
        if allowed {
            state.tokens -= 1.0;
        }

        self.backend
            .set_bucket(key, state.clone(), self.config.window_ms * 2)
            .await?;

        trace!(
            key,
            tokens = state.tokens,
            allowed,
            "Token bucket check"
        );

        let deficit = bucket_size as f64 - state.tokens;
        let reset_at_ms = now_ms + ((deficit / refill_rate) * refill_interval as f64).ceil() as u64;
        let reset_at_secs = reset_at_ms.div_ceil(1000);

        let remaining = state.tokens.floor().max(0.0) as u32;
        let current_count = deficit.ceil() as u32;

        if allowed {
            Ok(Decision::allow(
                bucket_size,
                remaining,
                reset_at_secs,
                current_count,
            ))
        } else {
            Ok(Decision::block(
                bucket_size,
                reset_at_secs,
                refill_interval.div_ceil(1000),
                current_count,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn limiter(bucket_size: u32, refill_rate: f64, refill_interval_ms: u64) -> TokenBucket {
        let config = LimiterConfig {
            bucket_size: Some(bucket_size),
            refill_rate: Some(refill_rate),
            refill_interval_ms: Some(refill_interval_ms),
            ..LimiterConfig::new(Algorithm::TokenBucket, bucket_size, 10_000)
        };
        TokenBucket::new(config, Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_bucket_starts_full() {
        let limiter = limiter(5, 1.0, 1_000);

        let decision = limiter.check("k", 0).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.limit, 5);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.current_count, 1);
    }

    #[tokio::test]
    async fn test_burst_then_throttle() {
        let limiter = limiter(10, 1.0, 1_000);

        // burst drains the full capacity
        for i in 0..10 {
            let decision = limiter.check("k", 0).await.unwrap();
            assert!(decision.allowed, "request {} should be allowed", i);
        }

        // bucket empty, no full interval elapsed
        let decision = limiter.check("k", 500).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, Some(1));

        // 3 intervals since the last refill at t=0 add 3 tokens
        for i in 0..3 {
            let decision = limiter.check("k", 3_000).await.unwrap();
            assert!(decision.allowed, "refilled request {} should be allowed", i);
        }
        let decision = limiter.check("k", 3_000).await.unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_fractional_intervals_carry_over() {
        let limiter = limiter(1, 1.0, 1_000);

        assert!(limiter.check("k", 0).await.unwrap().allowed);

        // 900ms is less than one interval; the refill anchor must not move
        assert!(!limiter.check("k", 900).await.unwrap().allowed);

        // 1100ms since t=0 is one whole interval, so one token is back
        assert!(limiter.check("k", 1_100).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_tokens_capped_at_capacity() {
        let limiter = limiter(3, 5.0, 100);

        assert!(limiter.check("k", 0).await.unwrap().allowed);

        // long idle would refill far past capacity; the cap holds
        let decision = limiter.check("k", 100_000).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_tokens_never_negative() {
        let limiter = limiter(2, 1.0, 1_000);

        limiter.check("k", 0).await.unwrap();
        limiter.check("k", 0).await.unwrap();
        for _ in 0..5 {
            let decision = limiter.check("k", 0).await.unwrap();
            assert!(!decision.allowed);
            assert_eq!(decision.remaining, 0);
        }
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, 1.0, 1_000);

        assert!(limiter.check("a", 0).await.unwrap().allowed);
        assert!(!limiter.check("a", 0).await.unwrap().allowed);
        assert!(limiter.check("b", 0).await.unwrap().allowed);
    }
}
