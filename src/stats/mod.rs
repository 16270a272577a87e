//! Process-wide rate limiting statistics.
//!
//! Writes are O(1) atomic adds on the request path; reads produce a
//! consistent-enough snapshot for dashboards. For multi-process
//! deployments these counters are per-process; aggregation is the
//! operator's concern.

use crate::config::Algorithm;
use dashmap::DashSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
}

impl Counters {
    fn record(&self, allowed: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.allowed.store(0, Ordering::Relaxed);
        self.blocked.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AlgorithmStats {
        AlgorithmStats {
            total: self.total.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
        }
    }
}

/// Registry of request counters shared by all middleware clones.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    totals: Counters,
    by_algorithm: [Counters; 5],
    keys: DashSet<String>,
}

/// Per-algorithm counter snapshot
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AlgorithmStats {
    pub total: u64,
    pub allowed: u64,
    pub blocked: u64,
}

/// Point-in-time view of the registry, serializable for the embedder's
/// stats endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub unique_keys: u64,
    pub requests_by_algorithm: BTreeMap<&'static str, AlgorithmStats>,
}

fn algorithm_index(algorithm: Algorithm) -> usize {
    match algorithm {
        Algorithm::TokenBucket => 0,
        Algorithm::LeakingBucket => 1,
        Algorithm::FixedWindow => 2,
        Algorithm::SlidingWindowLog => 3,
        Algorithm::SlidingWindowCounter => 4,
    }
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decision for `algorithm`.
    pub fn record(&self, algorithm: Algorithm, allowed: bool) {
        self.totals.record(allowed);
        self.by_algorithm[algorithm_index(algorithm)].record(allowed);
    }

    /// Note a client key for the unique-key count.
    ///
    /// Backed by a plain concurrent set; key diversity is bounded by the
    /// backend's TTL eviction upstream, but a probabilistic sketch is the
    /// better fit if keys are adversarial.
    pub fn observe_key(&self, key: &str) {
        if !self.keys.contains(key) {
            self.keys.insert(key.to_string());
        }
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        let requests_by_algorithm = Algorithm::ALL
            .iter()
            .map(|&a| (a.as_str(), self.by_algorithm[algorithm_index(a)].snapshot()))
            .collect();

        StatsSnapshot {
            total_requests: self.totals.total.load(Ordering::Relaxed),
            allowed_requests: self.totals.allowed.load(Ordering::Relaxed),
            blocked_requests: self.totals.blocked.load(Ordering::Relaxed),
            unique_keys: self.keys.len() as u64,
            requests_by_algorithm,
        }
    }

    /// Zero all counters and forget observed keys.
    pub fn reset(&self) {
        self.totals.reset();
        for counters in &self.by_algorithm {
            counters.reset();
        }
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let stats = StatsRegistry::new();

        stats.record(Algorithm::TokenBucket, true);
        stats.record(Algorithm::TokenBucket, false);
        stats.record(Algorithm::FixedWindow, true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.allowed_requests, 2);
        assert_eq!(snapshot.blocked_requests, 1);

        let tb = &snapshot.requests_by_algorithm["TOKEN_BUCKET"];
        assert_eq!(tb.total, 2);
        assert_eq!(tb.allowed, 1);
        assert_eq!(tb.blocked, 1);

        let fw = &snapshot.requests_by_algorithm["FIXED_WINDOW"];
        assert_eq!(fw.total, 1);
        assert_eq!(fw.blocked, 0);
    }

    #[test]
    fn test_every_algorithm_appears_in_snapshot() {
        let snapshot = StatsRegistry::new().snapshot();
        assert_eq!(snapshot.requests_by_algorithm.len(), 5);
        for algorithm in Algorithm::ALL {
            assert!(snapshot
                .requests_by_algorithm
                .contains_key(algorithm.as_str()));
        }
    }

    #[test]
    fn test_unique_keys_deduplicate() {
        let stats = StatsRegistry::new();

        stats.observe_key("1.2.3.4");
        stats.observe_key("1.2.3.4");
        stats.observe_key("5.6.7.8");

        assert_eq!(stats.snapshot().unique_keys, 2);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let stats = StatsRegistry::new();

        stats.record(Algorithm::SlidingWindowLog, true);
        stats.observe_key("1.2.3.4");
        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.unique_keys, 0);
        assert_eq!(snapshot.requests_by_algorithm["SLIDING_WINDOW_LOG"].total, 0);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let stats = StatsRegistry::new();
        stats.record(Algorithm::LeakingBucket, true);

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["totalRequests"], 1);
        assert_eq!(json["allowedRequests"], 1);
        assert_eq!(json["blockedRequests"], 0);
        assert_eq!(json["uniqueKeys"], 0);
        assert_eq!(json["requestsByAlgorithm"]["LEAKING_BUCKET"]["total"], 1);
    }
}
