//! Leaf utilities for the Waypoint request pipeline.
//!
//! Nothing in this crate knows about credentials or transports; the pieces
//! here are composed by `waypoint-core`.
//!
//! - [`resilience`]: clock abstraction and the backoff scheduler
//! - [`cache`]: canonical request keys and the response cache
//! - [`sync`]: shared outcome cell and the in-flight request registry

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod resilience;
pub mod sync;

pub use cache::{CacheKey, CacheStats, ResponseCache, ResponseCacheConfig, SweeperHandle};
pub use resilience::{BackoffScheduler, Clock, MockClock, SystemClock};
pub use sync::{InFlightGuard, InFlightRegistry, OutcomeCell, OutcomeHandle, Reservation};
