//! Time and retry primitives
//!
//! - [`Clock`]: monotonic time source, swappable for [`MockClock`] in tests
//! - [`BackoffScheduler`]: exponential delay with positive-only jitter

pub mod backoff;
pub mod clock;

pub use backoff::{baseline_delay, compute_delay, BackoffScheduler};
pub use clock::{Clock, MockClock, SystemClock};
