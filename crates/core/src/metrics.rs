//! Counters for pipeline activity
//!
//! ## Design
//! - **Relaxed atomics**: counters are independent; no derived metric needs a
//!   consistent cross-counter snapshot
//! - **No locking**: recording never blocks the request path
//! - Failures are counted per [`ErrorKind`] label

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use waypoint_domain::ErrorKind;

/// Live counters shared by the orchestrator and the built-in interceptors
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    calls: AtomicU64,
    cache_hits: AtomicU64,
    dedup_joins: AtomicU64,
    transport_attempts: AtomicU64,
    responses: AtomicU64,
    retries: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    total_latency_ms: AtomicU64,
    failures: Mutex<BTreeMap<&'static str, u64>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_attempt(&self) {
        self.transport_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self, succeeded: bool) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.refresh_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a completed exchange and how long it took
    pub fn record_response(&self, elapsed: Duration) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.total_latency_ms.fetch_add(millis, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: ErrorKind) {
        *self.failures.lock().entry(kind.label()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let failures = self.failures.lock().clone();
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            transport_attempts: self.transport_attempts.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            failures,
        }
    }
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub cache_hits: u64,
    pub dedup_joins: u64,
    pub transport_attempts: u64,
    pub responses: u64,
    pub retries: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub total_latency_ms: u64,
    /// Terminal failures by [`ErrorKind::label`]
    pub failures: BTreeMap<&'static str, u64>,
}

impl MetricsSnapshot {
    pub fn failure_count(&self, kind: ErrorKind) -> u64 {
        self.failures.get(kind.label()).copied().unwrap_or(0)
    }

    pub fn total_failures(&self) -> u64 {
        self.failures.values().sum()
    }

    /// Mean exchange latency, or zero before the first response
    pub fn average_latency(&self) -> Duration {
        if self.responses == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.total_latency_ms / self.responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_snapshot_is_empty() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.average_latency(), Duration::ZERO);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_call();
        metrics.record_transport_attempt();
        metrics.record_transport_attempt();
        metrics.record_retry();
        metrics.record_refresh(true);
        metrics.record_refresh(false);
        metrics.record_response(Duration::from_millis(30));
        metrics.record_response(Duration::from_millis(10));
        metrics.record_failure(ErrorKind::ServerError);
        metrics.record_failure(ErrorKind::ServerError);
        metrics.record_failure(ErrorKind::Timeout);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transport_attempts, 2);
        assert_eq!(snapshot.refreshes, 2);
        assert_eq!(snapshot.refresh_failures, 1);
        assert_eq!(snapshot.average_latency(), Duration::from_millis(20));
        assert_eq!(snapshot.failure_count(ErrorKind::ServerError), 2);
        assert_eq!(snapshot.total_failures(), 3);
    }
}
