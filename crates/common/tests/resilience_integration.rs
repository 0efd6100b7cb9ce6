//! Integration tests for the backoff scheduler
//!
//! Tests the positive-jitter bounds across the configured schedule

use std::time::Duration;

use waypoint_common::resilience::{baseline_delay, BackoffScheduler};
use waypoint_domain::PipelineConfig;

/// Validates the backoff bounds with the default pipeline configuration.
///
/// # Test Steps
/// 1. Build a scheduler from `PipelineConfig::default()`
/// 2. Sample delays for attempts 0..10 repeatedly
/// 3. Verify every delay is at least `base * 2^attempt` (capped) and at most
///    `cap * 1.20`
#[test]
fn test_default_schedule_respects_positive_jitter_bounds() {
    let config = PipelineConfig::default();
    let scheduler = BackoffScheduler::from_config(&config);
    let ceiling = config.max_delay.mul_f64(1.2) + Duration::from_millis(1);

    for attempt in 0..10u32 {
        let floor = baseline_delay(attempt, config.base_delay, config.max_delay);
        for _ in 0..100 {
            let delay = scheduler.delay(attempt);
            assert!(delay >= floor, "attempt {attempt} returned {delay:?} below {floor:?}");
            assert!(delay <= ceiling, "attempt {attempt} returned {delay:?} above {ceiling:?}");
        }
    }
}

/// Validates that the schedule doubles until it reaches the cap.
///
/// # Test Steps
/// 1. Use a zero-jitter scheduler
/// 2. Verify each delay doubles the previous one until the cap
#[test]
fn test_zero_jitter_schedule_is_exact() {
    let scheduler = BackoffScheduler::new(Duration::from_millis(250), Duration::from_secs(4), 0.0);
    let delays: Vec<u128> = (0..7).map(|attempt| scheduler.delay(attempt).as_millis()).collect();
    assert_eq!(delays, vec![250, 500, 1000, 2000, 4000, 4000, 4000]);
}
