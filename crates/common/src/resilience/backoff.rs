//! Exponential backoff with positive-only jitter
//!
//! `delay(attempt) = min(base * 2^attempt, cap) + U[0, fraction * baseline]`
//!
//! Jitter is only ever added. A retry never fires earlier than the unjittered
//! schedule, and the result never exceeds `cap * (1 + fraction)`.

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use waypoint_domain::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_JITTER_FRACTION, DEFAULT_MAX_DELAY_MS,
};
use waypoint_domain::PipelineConfig;

/// Unjittered delay for `attempt`: `min(base * 2^attempt, cap)`
pub fn baseline_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(Duration::MAX).min(cap)
}

/// Pure form of the schedule
///
/// `unit` is a sample from `[0, 1)`; callers supply their own randomness so
/// the result is fully deterministic.
pub fn compute_delay(attempt: u32, base: Duration, cap: Duration, fraction: f64, unit: f64) -> Duration {
    let baseline = baseline_delay(attempt, base, cap);
    let unit = unit.clamp(0.0, 1.0);
    let jitter = baseline.mul_f64(fraction.max(0.0) * unit);
    baseline + jitter
}

/// Stateful scheduler owning its random source
///
/// Seeded schedulers produce the same delays for the same sequence of calls.
#[derive(Debug)]
pub struct BackoffScheduler {
    base: Duration,
    cap: Duration,
    fraction: f64,
    rng: Mutex<StdRng>,
}

impl BackoffScheduler {
    pub fn new(base: Duration, cap: Duration, fraction: f64) -> Self {
        Self { base, cap, fraction, rng: Mutex::new(StdRng::from_entropy()) }
    }

    /// Deterministic scheduler for tests and replay
    pub fn with_seed(base: Duration, cap: Duration, fraction: f64, seed: u64) -> Self {
        Self { base, cap, fraction, rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.base_delay, config.max_delay, config.jitter_fraction)
    }

    pub fn baseline(&self, attempt: u32) -> Duration {
        baseline_delay(attempt, self.base, self.cap)
    }

    /// Upper bound of any delay this scheduler can return
    pub fn ceiling(&self) -> Duration {
        self.cap + self.cap.mul_f64(self.fraction.max(0.0))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let unit: f64 = self.rng.lock().gen_range(0.0..1.0);
        compute_delay(attempt, self.base, self.cap, self.fraction, unit)
    }
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            DEFAULT_JITTER_FRACTION,
        )
    }
}
