//! TTL-bounded, size-bounded store of successful GET results
//!
//! Entries past their expiry are treated as absent and purged when touched;
//! a background sweeper purges the rest on a fixed interval. When a write
//! finds the cache full, the oldest share of entries (by store time) is
//! evicted first. If the cache is still full afterwards the write is dropped,
//! so the entry ceiling is never exceeded.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::key::CacheKey;
use super::stats::{CacheStats, MetricsCollector};
use crate::resilience::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    data: V,
    stored_at: Instant,
    expires_at: Instant,
    /// Insertion sequence; breaks ties between equal store times
    seq: u64,
}

#[derive(Debug)]
struct CacheStorage<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    next_seq: u64,
}

/// Sizing and expiry policy for a [`ResponseCache`]
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCacheConfig {
    pub max_entries: usize,
    pub default_ttl: Duration,
    /// Share of `max_entries` evicted when a write finds the cache full
    pub evict_fraction: f64,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: waypoint_domain::constants::DEFAULT_CACHE_MAX_ENTRIES,
            default_ttl: Duration::from_millis(waypoint_domain::constants::DEFAULT_CACHE_TTL_MS),
            evict_fraction: waypoint_domain::constants::DEFAULT_CACHE_EVICT_FRACTION,
        }
    }
}

impl From<&waypoint_domain::PipelineConfig> for ResponseCacheConfig {
    fn from(config: &waypoint_domain::PipelineConfig) -> Self {
        Self {
            max_entries: config.cache_max_entries,
            default_ttl: config.cache_ttl,
            evict_fraction: config.cache_evict_fraction,
        }
    }
}

/// Response cache keyed by [`CacheKey`]
///
/// # Example
/// ```
/// use std::collections::BTreeMap;
///
/// use waypoint_common::cache::{CacheKey, ResponseCache, ResponseCacheConfig};
/// use waypoint_domain::HttpMethod;
///
/// let cache: ResponseCache<String> = ResponseCache::new(ResponseCacheConfig::default());
/// let key = CacheKey::derive(HttpMethod::Get, "/profile", None, &BTreeMap::new(), &[]);
/// cache.set(key.clone(), "cached".to_string(), None);
/// assert_eq!(cache.get(&key), Some("cached".to_string()));
/// ```
pub struct ResponseCache<V, C = SystemClock>
where
    V: Clone,
    C: Clock,
{
    storage: Mutex<CacheStorage<V>>,
    config: ResponseCacheConfig,
    metrics: MetricsCollector,
    clock: C,
}

impl<V: Clone> ResponseCache<V, SystemClock> {
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<V, C> ResponseCache<V, C>
where
    V: Clone,
    C: Clock,
{
    /// Create a cache with a custom clock (useful for testing)
    pub fn with_clock(config: ResponseCacheConfig, clock: C) -> Self {
        Self {
            storage: Mutex::new(CacheStorage { entries: HashMap::new(), next_seq: 0 }),
            config: ResponseCacheConfig { max_entries: config.max_entries.max(1), ..config },
            metrics: MetricsCollector::default(),
            clock,
        }
    }

    /// Look up a live entry
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now();
        let mut storage = self.storage.lock();

        let expired = match storage.entries.get(key) {
            None => {
                self.metrics.record_miss();
                return None;
            }
            Some(entry) => entry.expires_at <= now,
        };

        if expired {
            storage.entries.remove(key);
            self.metrics.record_expirations(1);
            self.metrics.record_miss();
            trace!(key = %key, "cache entry expired on read");
            return None;
        }

        self.metrics.record_hit();
        storage.entries.get(key).map(|entry| entry.data.clone())
    }

    /// Store a value; `ttl` of `None` uses the configured default
    ///
    /// Returns `false` when the write was dropped to keep the ceiling.
    pub fn set(&self, key: CacheKey, value: V, ttl: Option<Duration>) -> bool {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let max = self.config.max_entries;
        let mut storage = self.storage.lock();

        if !storage.entries.contains_key(&key) && storage.entries.len() >= max {
            let expired = Self::purge_expired_locked(&mut storage, now);
            self.metrics.record_expirations(expired);

            if storage.entries.len() >= max {
                let evicted = self.evict_oldest_locked(&mut storage);
                self.metrics.record_evictions(evicted);
                debug!(evicted, max_entries = max, "response cache full, evicted oldest entries");
            }

            if storage.entries.len() >= max {
                self.metrics.record_dropped_write();
                return false;
            }
        }

        let seq = storage.next_seq;
        storage.next_seq += 1;
        storage.entries.insert(key, CacheEntry { data: value, stored_at: now, expires_at: now + ttl, seq });
        self.metrics.record_insert();
        true
    }

    /// Remove a single entry
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.storage.lock().entries.remove(key).is_some()
    }

    /// Remove every entry whose key satisfies `predicate`
    pub fn invalidate_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey) -> bool,
    {
        let mut storage = self.storage.lock();
        let before = storage.entries.len();
        storage.entries.retain(|key, _| !predicate(key));
        before - storage.entries.len()
    }

    /// Remove entries belonging to the resource at `path`
    ///
    /// See [`CacheKey::is_related_to`].
    pub fn invalidate_resource(&self, path: &str) -> usize {
        self.invalidate_matching(|key| key.is_related_to(path))
    }

    pub fn clear(&self) {
        self.storage.lock().entries.clear();
    }

    /// Remove expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = Self::purge_expired_locked(&mut self.storage.lock(), now);
        self.metrics.record_expirations(removed);
        removed
    }

    pub fn len(&self) -> usize {
        self.storage.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.config.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.len(), self.config.max_entries)
    }

    fn purge_expired_locked(storage: &mut CacheStorage<V>, now: Instant) -> usize {
        let before = storage.entries.len();
        storage.entries.retain(|_, entry| entry.expires_at > now);
        before - storage.entries.len()
    }

    fn evict_oldest_locked(&self, storage: &mut CacheStorage<V>) -> usize {
        let share = (self.config.max_entries as f64 * self.config.evict_fraction).ceil() as usize;
        let count = share.max(1).min(storage.entries.len());

        let mut by_age: Vec<(Instant, u64, CacheKey)> = storage
            .entries
            .iter()
            .map(|(key, entry)| (entry.stored_at, entry.seq, key.clone()))
            .collect();
        by_age.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (_, _, key) in by_age.into_iter().take(count) {
            storage.entries.remove(&key);
        }
        count
    }
}

impl<V, C> ResponseCache<V, C>
where
    V: Clone + Send + 'static,
    C: Clock,
{
    /// Spawn a task that purges expired entries every `interval`
    ///
    /// The task holds only a weak reference and stops once the cache is
    /// dropped or the returned handle is dropped. Must be called from within
    /// a Tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, "cache sweeper purged expired entries");
                }
            }
        });
        SweeperHandle { handle }
    }
}

/// Stops the background sweeper when dropped
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
