use super::{BucketState, QueueState, StorageBackend};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// How often the background sweep drops expired entries.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// A value paired with its expiry instant.
#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl_ms: u64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + Duration::from_millis(ttl_ms),
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process storage backend.
///
/// One map per primitive kind; `DashMap` shard locks make every single-key
/// operation atomic, including `increment`. State is ephemeral: it does not
/// survive a restart and is intended for single-node use.
///
/// Reads treat expired entries as absent. A background task started by
/// [`MemoryBackend::start`] additionally sweeps expired entries once per
/// minute to bound memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    counters: DashMap<String, Expiring<u64>>,
    logs: DashMap<String, Expiring<Vec<u64>>>,
    buckets: DashMap<String, Expiring<BucketState>>,
    queues: DashMap<String, Expiring<QueueState>>,
}

impl MemoryBackend {
    /// Create a backend without the background eviction task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared backend and spawn the periodic eviction sweep.
    ///
    /// The sweep holds only a weak reference; it exits once the last
    /// strong reference to the backend is dropped. Must be called from
    /// within a tokio runtime.
    pub fn start() -> Arc<Self> {
        let backend = Arc::new(Self::new());
        let weak = Arc::downgrade(&backend);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVICTION_INTERVAL);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(backend) = weak.upgrade() else { break };
                let evicted = backend.evict_expired();
                if evicted > 0 {
                    debug!(evicted, "Evicted expired rate limit entries");
                }
            }
        });

        backend
    }

    /// Drop every expired entry. Returns the number of entries removed.
    pub fn evict_expired(&self) -> usize {
        let before = self.entry_count();
        self.counters.retain(|_, e| !e.expired());
        self.logs.retain(|_, e| !e.expired());
        self.buckets.retain(|_, e| !e.expired());
        self.queues.retain(|_, e| !e.expired());
        before - self.entry_count()
    }

    /// Total number of stored entries across all primitive kinds,
    /// including entries that have expired but not yet been swept.
    pub fn entry_count(&self) -> usize {
        self.counters.len() + self.logs.len() + self.buckets.len() + self.queues.len()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64> {
        // The entry guard holds the shard lock, so the read-modify-write
        // below is atomic with respect to other callers on the same key.
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(0, window_ms));
        if entry.expired() {
            // logically a fresh key: restart the count and the TTL
            *entry = Expiring::new(0, window_ms);
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn get(&self, key: &str) -> Result<Option<u64>> {
        Ok(self
            .counters
            .get(key)
            .filter(|e| !e.expired())
            .map(|e| e.value))
    }

    async fn set(&self, key: &str, value: u64, window_ms: u64) -> Result<()> {
        self.counters
            .insert(key.to_string(), Expiring::new(value, window_ms));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // Windowed counters derive their key as "{key}:{windowStart}", so a
        // logical delete must also drop the derived keys.
        let prefix = format!("{key}:");
        self.counters
            .retain(|k, _| k != key && !k.starts_with(&prefix));
        self.logs.remove(key);
        self.buckets.remove(key);
        self.queues.remove(key);
        Ok(())
    }

    async fn add_timestamp(&self, key: &str, timestamp_ms: u64, ttl_ms: u64) -> Result<()> {
        let mut entry = self
            .logs
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(Vec::new(), ttl_ms));
        if entry.expired() {
            *entry = Expiring::new(Vec::new(), ttl_ms);
        }
        // keep the log sorted; concurrent writers may commit out of order
        let pos = entry.value.partition_point(|&t| t <= timestamp_ms);
        entry.value.insert(pos, timestamp_ms);
        entry.expires_at = Instant::now() + Duration::from_millis(ttl_ms);
        Ok(())
    }

    async fn get_timestamps(&self, key: &str, min_ms: u64) -> Result<Vec<u64>> {
        Ok(self
            .logs
            .get(key)
            .filter(|e| !e.expired())
            .map(|e| e.value.iter().copied().filter(|&t| t >= min_ms).collect())
            .unwrap_or_default())
    }

    async fn remove_old_timestamps(&self, key: &str, min_ms: u64) -> Result<()> {
        if let Some(mut entry) = self.logs.get_mut(key) {
            entry.value.retain(|&t| t >= min_ms);
        }
        Ok(())
    }

    async fn get_bucket(&self, key: &str) -> Result<Option<BucketState>> {
        Ok(self
            .buckets
            .get(key)
            .filter(|e| !e.expired())
            .map(|e| e.value.clone()))
    }

    async fn set_bucket(&self, key: &str, state: BucketState, ttl_ms: u64) -> Result<()> {
        self.buckets
            .insert(key.to_string(), Expiring::new(state, ttl_ms));
        Ok(())
    }

    async fn get_queue(&self, key: &str) -> Result<Option<QueueState>> {
        Ok(self
            .queues
            .get(key)
            .filter(|e| !e.expired())
            .map(|e| e.value.clone()))
    }

    async fn set_queue(&self, key: &str, state: QueueState, ttl_ms: u64) -> Result<()> {
        self.queues
            .insert(key.to_string(), Expiring::new(state, ttl_ms));
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.counters.clear();
        self.logs.clear();
        self.buckets.clear();
        self.queues.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_creates_and_counts() {
        let backend = MemoryBackend::new();

        assert_eq!(backend.increment("a", 10_000).await.unwrap(), 1);
        assert_eq!(backend.increment("a", 10_000).await.unwrap(), 2);
        assert_eq!(backend.increment("b", 10_000).await.unwrap(), 1);
        assert_eq!(backend.get("a").await.unwrap(), Some(2));
        assert_eq!(backend.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_consecutive() {
        let backend = Arc::new(MemoryBackend::new());
        let mut handles = Vec::new();

        for _ in 0..50 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.increment("shared", 60_000).await.unwrap()
            }));
        }

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort_unstable();

        // N concurrent increments return exactly {1, 2, ..., N}
        assert_eq!(values, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_counter_expires() {
        let backend = MemoryBackend::new();

        backend.increment("k", 20).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(backend.get("k").await.unwrap(), None);
        // a fresh increment restarts the count
        assert_eq!(backend.increment("k", 20).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_timestamps_sorted_and_filtered() {
        let backend = MemoryBackend::new();

        backend.add_timestamp("k", 300, 10_000).await.unwrap();
        backend.add_timestamp("k", 100, 10_000).await.unwrap();
        backend.add_timestamp("k", 200, 10_000).await.unwrap();

        assert_eq!(
            backend.get_timestamps("k", 0).await.unwrap(),
            vec![100, 200, 300]
        );
        assert_eq!(
            backend.get_timestamps("k", 200).await.unwrap(),
            vec![200, 300]
        );

        backend.remove_old_timestamps("k", 250).await.unwrap();
        assert_eq!(backend.get_timestamps("k", 0).await.unwrap(), vec![300]);
    }

    #[tokio::test]
    async fn test_bucket_state_roundtrip() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get_bucket("k").await.unwrap(), None);

        let state = BucketState {
            tokens: 4.0,
            last_refill_ms: 1_234,
        };
        backend.set_bucket("k", state.clone(), 10_000).await.unwrap();
        assert_eq!(backend.get_bucket("k").await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_queue_state_roundtrip() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get_queue("k").await.unwrap(), None);

        let state = QueueState {
            arrivals_ms: vec![10, 20, 30],
            last_leak_ms: 30,
        };
        backend.set_queue("k", state.clone(), 10_000).await.unwrap();
        assert_eq!(backend.get_queue("k").await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_delete_drops_all_state_for_logical_key() {
        let backend = MemoryBackend::new();

        backend.increment("ip:1:1000", 10_000).await.unwrap();
        backend.increment("ip:1", 10_000).await.unwrap();
        backend.add_timestamp("ip:1", 5, 10_000).await.unwrap();
        backend
            .set_bucket(
                "ip:1",
                BucketState {
                    tokens: 1.0,
                    last_refill_ms: 0,
                },
                10_000,
            )
            .await
            .unwrap();
        backend.increment("ip:10", 10_000).await.unwrap();

        backend.delete("ip:1").await.unwrap();

        assert_eq!(backend.get("ip:1").await.unwrap(), None);
        assert_eq!(backend.get("ip:1:1000").await.unwrap(), None);
        assert!(backend.get_timestamps("ip:1", 0).await.unwrap().is_empty());
        assert_eq!(backend.get_bucket("ip:1").await.unwrap(), None);
        // unrelated keys survive
        assert_eq!(backend.get("ip:10").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_evict_expired_bounds_memory() {
        let backend = MemoryBackend::new();

        backend.increment("short", 20).await.unwrap();
        backend.increment("long", 60_000).await.unwrap();
        backend.add_timestamp("log", 1, 20).await.unwrap();
        assert_eq!(backend.entry_count(), 3);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let evicted = backend.evict_expired();

        assert_eq!(evicted, 2);
        assert_eq!(backend.entry_count(), 1);
        assert_eq!(backend.get("long").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let backend = MemoryBackend::new();

        backend.increment("a", 10_000).await.unwrap();
        backend.add_timestamp("b", 1, 10_000).await.unwrap();
        backend
            .set_queue("c", QueueState::default(), 10_000)
            .await
            .unwrap();

        backend.reset().await.unwrap();
        assert_eq!(backend.entry_count(), 0);
    }
}
