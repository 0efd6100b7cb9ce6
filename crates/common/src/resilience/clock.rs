//! Time source abstraction
//!
//! Expiry checks in the response cache and the refresh attempt window read
//! time through [`Clock`] so tests can move time forward without sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic time source
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Real monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Manually advanced clock for deterministic tests
///
/// Clones share the same elapsed offset.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the mock clock advance scenario.
    ///
    /// Assertions:
    /// - Confirms `after.duration_since(start)` equals `Duration::from_secs(5)`.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
    }

    /// Validates that clones share elapsed time.
    ///
    /// Assertions:
    /// - Confirms both clones report `Duration::from_millis(1500)`.
    #[test]
    fn test_mock_clock_clones_share_time() {
        let first = MockClock::new();
        let second = first.clone();
        first.advance_millis(1000);
        second.advance_millis(500);
        assert_eq!(first.elapsed(), Duration::from_millis(1500));
        assert_eq!(second.elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let earlier = clock.now();
        assert!(clock.now() >= earlier);
    }
}
