//! Requeue backoff for workloads whose pass asked to be retried.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Default delay before the first retry.
pub const DEFAULT_REQUEUE_BASE: Duration = Duration::from_millis(500);

/// Default upper bound on the retry delay.
pub const DEFAULT_REQUEUE_MAX: Duration = Duration::from_secs(5 * 60);

/// Longest delay ever applied, whatever the configured ceiling.
pub const MAX_REQUEUE_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-key exponential backoff.
///
/// Each consecutive failure doubles the delay up to `max`. A success clears
/// the key.
#[derive(Debug, Clone)]
pub struct RequeueBackoff {
    base: Duration,
    max: Duration,

    /// Tracked failures: key -> (consecutive failures, next retry due).
    failures: BTreeMap<String, (u32, Instant)>,
}

impl RequeueBackoff {
    /// Create a tracker. Both delays are clamped to [`MAX_REQUEUE_DELAY`].
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.min(MAX_REQUEUE_DELAY);
        Self {
            base,
            max: max.clamp(base, MAX_REQUEUE_DELAY),
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure for a key and return the delay before it is due.
    pub fn record_failure(&mut self, key: &str) -> Duration {
        let now = Instant::now();
        let entry = self.failures.entry(key.to_string()).or_insert((0, now));
        entry.0 = entry.0.saturating_add(1);

        let delay = delay_for(self.base, self.max, entry.0);
        entry.1 = now.checked_add(delay).unwrap_or(now);
        delay
    }

    /// Number of consecutive failures recorded for a key.
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map_or(0, |(count, _)| *count)
    }

    /// Keys whose retry is due at `now`, in key order.
    pub fn due(&self, now: Instant) -> Vec<String> {
        self.failures
            .iter()
            .filter(|(_, (_, due))| *due <= now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Clear failure tracking for a key (on success).
    pub fn clear(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Drop keys that are no longer reconciled.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.failures.retain(|key, _| keep(key));
    }
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEUE_BASE, DEFAULT_REQUEUE_MAX)
    }
}

fn delay_for(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}
