//! Per-user request cooldown.
//!
//! One timestamp per user, checked and stamped under a single lock so two
//! simultaneous mentions from the same user cannot both be allowed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;

/// Entries older than this many cooldown windows are evicted by the sweep.
const EVICTION_FACTOR: u32 = 10;

/// Result of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    /// The request may proceed; its timestamp has been recorded.
    Allowed,
    /// The user must wait. The stored timestamp was left untouched.
    Wait { retry_after: Duration },
}

impl CooldownDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Tracks the last accepted request per user.
pub struct CooldownTracker {
    window: Duration,
    last_request: Mutex<HashMap<u64, i64>>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Allow and stamp `now_ms` if the user's window has elapsed, otherwise
    /// report how long to wait (rounded up to whole seconds).
    pub fn check_and_stamp(&self, user_id: u64, now_ms: i64) -> CooldownDecision {
        let window_ms = self.window.as_millis() as i64;
        let mut entries = self.entries();

        if let Some(&last) = entries.get(&user_id) {
            let elapsed = (now_ms - last).max(0);
            if elapsed < window_ms {
                let remaining_ms = (window_ms - elapsed) as u64;
                let retry_after = Duration::from_secs(remaining_ms.div_ceil(1000));
                debug!(user_id, remaining_ms, "Cooldown active");
                return CooldownDecision::Wait { retry_after };
            }
        }

        entries.insert(user_id, now_ms);
        CooldownDecision::Allowed
    }

    /// Remove entries whose stored timestamp is older than ten windows.
    /// Returns how many were evicted.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let max_age_ms = (self.window * EVICTION_FACTOR).as_millis() as i64;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, &mut last| now_ms - last <= max_age_ms);
        before - entries.len()
    }

    /// Number of users with a stored timestamp.
    pub fn tracked_users(&self) -> usize {
        self.entries().len()
    }

    /// Start a background task that runs [`sweep`](Self::sweep) every `every`,
    /// independent of request traffic.
    pub fn start_sweeper<C: Clock>(self: &Arc<Self>, every: Duration, clock: C) -> JoinHandle<()> {
        let tracker = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let evicted = tracker.sweep(clock.now_ms());
                if evicted > 0 {
                    info!("Evicted {} stale cooldown entries", evicted);
                }
            }
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, i64>> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
