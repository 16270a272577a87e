use crate::error::{LimiterError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limiting algorithm identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    /// Token bucket (burst-friendly, smooth long-term rate)
    TokenBucket,
    /// Leaking bucket (FIFO queue drained at a fixed rate)
    LeakingBucket,
    /// Fixed window counter (simple, boundary-burst edge case)
    FixedWindow,
    /// Sliding window log (exact, O(limit) memory per key)
    SlidingWindowLog,
    /// Sliding window counter (weighted two-window estimate)
    SlidingWindowCounter,
}

impl Algorithm {
    /// All algorithm ids, in registry order.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::TokenBucket,
        Algorithm::LeakingBucket,
        Algorithm::FixedWindow,
        Algorithm::SlidingWindowLog,
        Algorithm::SlidingWindowCounter,
    ];

    /// Stable string id, used in stats snapshots and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "TOKEN_BUCKET",
            Algorithm::LeakingBucket => "LEAKING_BUCKET",
            Algorithm::FixedWindow => "FIXED_WINDOW",
            Algorithm::SlidingWindowLog => "SLIDING_WINDOW_LOG",
            Algorithm::SlidingWindowCounter => "SLIDING_WINDOW_COUNTER",
        }
    }
}

/// Rate limiter configuration
///
/// Immutable per limiter instance. Algorithm-specific fields default to
/// values derived from `max_requests` and `window_ms` when not set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Algorithm to use
    pub algorithm: Algorithm,
    /// Maximum number of requests allowed within one window
    pub max_requests: u32,
    /// Logical rate period in milliseconds
    pub window_ms: u64,

    /// Token bucket capacity (defaults to `max_requests`)
    #[serde(default)]
    pub bucket_size: Option<u32>,
    /// Tokens added per refill interval (defaults to `max_requests`)
    #[serde(default)]
    pub refill_rate: Option<f64>,
    /// Refill interval in milliseconds (defaults to `window_ms`)
    #[serde(default)]
    pub refill_interval_ms: Option<u64>,

    /// Leaking bucket queue capacity (defaults to `max_requests`)
    #[serde(default)]
    pub queue_size: Option<u32>,
    /// Requests drained per second (defaults to `max_requests` per window)
    #[serde(default)]
    pub processing_rate: Option<f64>,

    /// Message used in the rejection body
    #[serde(default)]
    pub message: Option<String>,
    /// Status code for rejected requests
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    /// Whether to emit `X-RateLimit-*` headers
    #[serde(default = "default_emit_headers")]
    pub emit_headers: bool,
}

fn default_status_code() -> u16 {
    429
}

fn default_emit_headers() -> bool {
    true
}

impl LimiterConfig {
    /// Create a configuration with defaults for all optional fields.
    pub fn new(algorithm: Algorithm, max_requests: u32, window_ms: u64) -> Self {
        Self {
            algorithm,
            max_requests,
            window_ms,
            bucket_size: None,
            refill_rate: None,
            refill_interval_ms: None,
            queue_size: None,
            processing_rate: None,
            message: None,
            status_code: default_status_code(),
            emit_headers: default_emit_headers(),
        }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Token bucket capacity (defaults to `max_requests`)
    pub fn bucket_size(&self) -> u32 {
        self.bucket_size.unwrap_or(self.max_requests)
    }

    /// Tokens added per refill interval (defaults to `max_requests`)
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate.unwrap_or(self.max_requests as f64)
    }

    /// Refill interval in milliseconds (defaults to `window_ms`)
    pub fn refill_interval_ms(&self) -> u64 {
        self.refill_interval_ms.unwrap_or(self.window_ms)
    }

    /// Leaking bucket queue capacity (defaults to `max_requests`)
    pub fn queue_size(&self) -> u32 {
        self.queue_size.unwrap_or(self.max_requests)
    }

    /// Requests drained per second (defaults to `max_requests` per window)
    pub fn processing_rate(&self) -> f64 {
        self.processing_rate
            .unwrap_or(self.max_requests as f64 * 1000.0 / self.window_ms as f64)
    }

    /// Rejection message (defaults to a generic one)
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("Rate limit exceeded")
    }

    /// Validate the configuration
    ///
    /// A limiter must not be constructible from an invalid configuration,
    /// so this runs before any algorithm instance is built.
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(LimiterError::Config(
                "window_ms must be positive".to_string(),
            ));
        }
        if self.max_requests == 0 {
            return Err(LimiterError::Config(
                "max_requests must be positive".to_string(),
            ));
        }
        if self.bucket_size() == 0 {
            return Err(LimiterError::Config(
                "bucket_size must be at least 1".to_string(),
            ));
        }
        if self.queue_size() == 0 {
            return Err(LimiterError::Config(
                "queue_size must be at least 1".to_string(),
            ));
        }
        if self.refill_rate() <= 0.0 {
            return Err(LimiterError::Config(
                "refill_rate must be positive".to_string(),
            ));
        }
        if self.refill_interval_ms() == 0 {
            return Err(LimiterError::Config(
                "refill_interval_ms must be positive".to_string(),
            ));
        }
        if self.processing_rate() <= 0.0 {
            return Err(LimiterError::Config(
                "processing_rate must be positive".to_string(),
            ));
        }
        if !(100..=599).contains(&self.status_code) {
            return Err(LimiterError::Config(format!(
                "status_code {} is not a valid HTTP status",
                self.status_code
            )));
        }
        Ok(())
    }
}
