//! Response caching for idempotent reads
//!
//! - [`CacheKey`]: order-independent canonical key (sorted query parameters,
//!   recursively sorted JSON bodies, selected headers)
//! - [`ResponseCache`]: TTL-bounded, size-bounded store with a hard entry
//!   ceiling and a background sweeper
//! - [`CacheStats`]: hit/miss/eviction counters
//!
//! # Example
//! ```
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! use serde_json::json;
//! use waypoint_common::cache::{CacheKey, ResponseCache, ResponseCacheConfig};
//! use waypoint_domain::HttpMethod;
//!
//! let cache: ResponseCache<serde_json::Value> = ResponseCache::new(ResponseCacheConfig {
//!     max_entries: 50,
//!     default_ttl: Duration::from_secs(30),
//!     evict_fraction: 0.1,
//! });
//!
//! let a = CacheKey::derive(HttpMethod::Get, "/search?b=2&a=1", None, &BTreeMap::new(), &[]);
//! let b = CacheKey::derive(HttpMethod::Get, "/search?a=1&b=2", None, &BTreeMap::new(), &[]);
//! assert_eq!(a, b);
//!
//! cache.set(a, json!({ "hits": 3 }), None);
//! assert!(cache.get(&b).is_some());
//! ```

pub mod key;
pub mod response_cache;
pub mod stats;

pub use key::{paths_related, resource_path, CacheKey};
pub use response_cache::{ResponseCache, ResponseCacheConfig, SweeperHandle};
pub use stats::CacheStats;
