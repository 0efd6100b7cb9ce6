//! Response cache counters
//!
//! Counters are recorded under the cache lock or with relaxed atomics;
//! [`CacheStats`] is a point-in-time copy.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of cache performance counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries
    pub size: usize,

    /// Maximum allowed entries
    pub max_size: usize,

    /// Lookups that returned a live entry
    pub hits: u64,

    /// Lookups that found nothing or an expired entry
    pub misses: u64,

    /// Writes admitted into the cache
    pub inserts: u64,

    /// Entries removed to make room for new writes
    pub evictions: u64,

    /// Entries removed because their TTL elapsed
    pub expirations: u64,

    /// Writes discarded because the cache stayed full after eviction
    pub dropped_writes: u64,
}

impl CacheStats {
    /// Share of lookups served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// `size / max_size`, zero for an unbounded snapshot
    pub fn fill_percentage(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.size as f64 / self.max_size as f64
        }
    }

    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Lock-free counters behind [`CacheStats`]
#[derive(Debug, Default)]
pub(crate) struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    dropped_writes: AtomicU64,
}

impl MetricsCollector {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: usize) {
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_write(&self) {
        self.dropped_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, size: usize, max_size: usize) -> CacheStats {
        CacheStats {
            size,
            max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_with_no_accesses() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        assert_eq!(CacheStats::default().fill_percentage(), 0.0);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let collector = MetricsCollector::default();
        collector.record_hit();
        collector.record_hit();
        collector.record_hit();
        collector.record_miss();
        collector.record_evictions(4);
        collector.record_dropped_write();

        let stats = collector.snapshot(10, 20);
        assert_eq!(stats.total_accesses(), 4);
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(stats.evictions, 4);
        assert_eq!(stats.dropped_writes, 1);
        assert!((stats.fill_percentage() - 0.5).abs() < f64::EPSILON);
    }
}
