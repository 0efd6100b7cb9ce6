//! Pipeline constants
//!
//! Centralized defaults for the request pipeline. Every value here can be
//! overridden through [`crate::PipelineConfig`].

// Backoff
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_JITTER_FRACTION: f64 = 0.20;

// Retry and recursion ceilings
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_DEPTH: u32 = 10;

// Token refresh rate limiting
pub const DEFAULT_MAX_REFRESH_ATTEMPTS: u32 = 2;
pub const DEFAULT_REFRESH_WINDOW_MS: u64 = 60_000;
/// Number of hex characters kept from a refresh-token digest.
pub const REFRESH_FINGERPRINT_LEN: usize = 16;

// Response cache
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100;
pub const DEFAULT_CACHE_SWEEP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_CACHE_EVICT_FRACTION: f64 = 0.10;
/// Canonical keys longer than this are condensed to a prefix plus hash.
pub const CACHE_KEY_MAX_LEN: usize = 128;
pub const CACHE_KEY_PREFIX_LEN: usize = 48;

// Transport
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const RETRY_AFTER_HEADER: &str = "retry-after";
pub const TIMEOUT_MESSAGE: &str = "request timeout";
