//! Rate limit on refresh attempts per refresh token
//!
//! Entries are keyed by a truncated SHA-256 fingerprint of the refresh token
//! so the token itself never sits in the ledger or in log fields.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use waypoint_common::resilience::{Clock, SystemClock};
use waypoint_domain::constants::REFRESH_FINGERPRINT_LEN;

/// Truncated hex SHA-256 of a refresh token
pub fn fingerprint(refresh_token: &str) -> String {
    let digest = Sha256::digest(refresh_token.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(REFRESH_FINGERPRINT_LEN);
    encoded
}

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    count: u32,
    first_attempt_at: Instant,
}

/// Outcome of [`RefreshLedger::register_attempt`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDecision {
    /// Go ahead; `attempt` is 1-based within the current window
    Proceed { attempt: u32 },
    /// Ceiling reached inside the window; the entry has been removed
    Exhausted,
}

/// Sliding-window attempt counter keyed by refresh-token fingerprint
#[derive(Debug)]
pub struct RefreshLedger<C: Clock = SystemClock> {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    window: Duration,
    ceiling: u32,
    clock: C,
}

impl RefreshLedger<SystemClock> {
    pub fn new(window: Duration, ceiling: u32) -> Self {
        Self::with_clock(window, ceiling, SystemClock)
    }
}

impl<C: Clock> RefreshLedger<C> {
    pub fn with_clock(window: Duration, ceiling: u32, clock: C) -> Self {
        Self { entries: Mutex::new(HashMap::new()), window, ceiling: ceiling.max(1), clock }
    }

    /// Count an attempt for `fingerprint`, or refuse it at the ceiling
    pub fn register_attempt(&self, fingerprint: &str) -> LedgerDecision {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(fingerprint) {
            if now.duration_since(entry.first_attempt_at) < self.window {
                if entry.count >= self.ceiling {
                    entries.remove(fingerprint);
                    return LedgerDecision::Exhausted;
                }
                entry.count += 1;
                return LedgerDecision::Proceed { attempt: entry.count };
            }
            *entry = LedgerEntry { count: 1, first_attempt_at: now };
            return LedgerDecision::Proceed { attempt: 1 };
        }

        entries.insert(fingerprint.to_string(), LedgerEntry { count: 1, first_attempt_at: now });
        LedgerDecision::Proceed { attempt: 1 }
    }

    /// Forget attempts for `fingerprint` (after a successful refresh)
    pub fn clear(&self, fingerprint: &str) {
        self.entries.lock().remove(fingerprint);
    }

    pub fn attempts(&self, fingerprint: &str) -> u32 {
        self.entries.lock().get(fingerprint).map_or(0, |entry| entry.count)
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }
}
