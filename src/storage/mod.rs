//! Storage backends for per-key rate limit state.
//!
//! Each algorithm consumes only the primitives that fit it: counters with a
//! TTL (fixed window, sliding window counter), a sorted timestamp log
//! (sliding window log), or a structured state blob (token bucket, leaking
//! bucket). The interface is deliberately wider than any single algorithm
//! needs so that backends never have to emulate foreign semantics.
//!
//! Two implementations are provided:
//!
//! - [`MemoryBackend`]: in-process, single-node, with periodic eviction
//! - [`RedisBackend`]: distributed, built on Redis atomic counters and
//!   sorted sets

pub mod lua_scripts;
pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

/// Token bucket state stored per key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Current token count (fractional during refill accounting)
    pub tokens: f64,
    /// Last refill instant in milliseconds since epoch
    pub last_refill_ms: u64,
}

/// Leaking bucket state stored per key
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueState {
    /// Arrival times of queued requests, oldest first
    pub arrivals_ms: Vec<u64>,
    /// Last leak instant in milliseconds since epoch
    pub last_leak_ms: u64,
}

/// Abstract per-key state store with TTL.
///
/// All operations may fail; failures propagate to the middleware, which
/// fails open. All operations must be safe under concurrent use from
/// multiple request paths. `increment` must be atomic: two concurrent
/// callers observe distinct, consecutive values. The log operations need
/// not be atomic across calls; algorithms operate on the snapshot they
/// read and tolerate interleavings.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Atomically add 1 to the counter at `key`, creating it at 1 if
    /// absent. A TTL of `window_ms` is bound when the key is created.
    /// Returns the post-increment value.
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64>;

    /// Current counter value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>>;

    /// Overwrite the counter and set its TTL.
    async fn set(&self, key: &str, value: u64, window_ms: u64) -> Result<()>;

    /// Remove all state (counter, log, bucket, queue) associated with the
    /// logical key, including windowed counter keys derived from it.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Append `timestamp_ms` to the log at `key` and refresh its TTL to
    /// `ttl_ms`.
    async fn add_timestamp(&self, key: &str, timestamp_ms: u64, ttl_ms: u64) -> Result<()>;

    /// Timestamps `>= min_ms`, in ascending order.
    async fn get_timestamps(&self, key: &str, min_ms: u64) -> Result<Vec<u64>>;

    /// Drop all timestamps `< min_ms`.
    async fn remove_old_timestamps(&self, key: &str, min_ms: u64) -> Result<()>;

    /// Token bucket state for `key`, or `None` if absent or expired.
    async fn get_bucket(&self, key: &str) -> Result<Option<BucketState>>;

    /// Overwrite token bucket state with a TTL.
    async fn set_bucket(&self, key: &str, state: BucketState, ttl_ms: u64) -> Result<()>;

    /// Leaking bucket state for `key`, or `None` if absent or expired.
    async fn get_queue(&self, key: &str) -> Result<Option<QueueState>>;

    /// Overwrite leaking bucket state with a TTL.
    async fn set_queue(&self, key: &str, state: QueueState, ttl_ms: u64) -> Result<()>;

    /// Drop all rate limit keys under this backend.
    async fn reset(&self) -> Result<()>;
}
