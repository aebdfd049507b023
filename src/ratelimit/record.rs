//! Per-caller rate limit state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The state stored per `(operation, caller key)` pair.
///
/// Created on the first call of a fresh window, mutated on each subsequent
/// call, and removed either by the store's own expiry or explicitly once an
/// elapsed cooldown is detected. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// When the current counting window started.
    pub window_started_at: u64,
    /// Calls seen so far in this window.
    pub count: u32,
    /// When the caller entered cooldown, if they have.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_started_at: Option<u64>,
}

impl RateLimitRecord {
    /// The record for the first call of a new window.
    pub fn fresh(now: u64) -> Self {
        Self {
            window_started_at: now,
            count: 1,
            cooldown_started_at: None,
        }
    }

    /// Whether the caller has been placed in cooldown.
    pub fn in_cooldown(&self) -> bool {
        self.cooldown_started_at.is_some()
    }

    /// Whether `now` still falls inside the counting window.
    pub fn within_window(&self, now: u64, time_limit: Duration) -> bool {
        now < self.window_started_at + time_limit.as_secs()
    }

    /// Whether the cooldown has run its course at `now`.
    ///
    /// Always `false` when no cooldown was entered.
    pub fn cooldown_elapsed(&self, now: u64, wait_time: Duration) -> bool {
        match self.cooldown_started_at {
            Some(started) => now >= started + wait_time.as_secs(),
            None => false,
        }
    }

    /// Time left until the cooldown ends, saturating at zero.
    pub fn wait_remaining(&self, now: u64, wait_time: Duration) -> Duration {
        match self.cooldown_started_at {
            Some(started) => {
                let ends_at = started + wait_time.as_secs();
                Duration::from_secs(ends_at.saturating_sub(now))
            }
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_record() {
        let record = RateLimitRecord::fresh(100);

        assert_eq!(record.window_started_at, 100);
        assert_eq!(record.count, 1);
        assert!(!record.in_cooldown());
    }

    #[test]
    fn test_window_containment() {
        let record = RateLimitRecord::fresh(100);
        let limit = Duration::from_secs(30);

        assert!(record.within_window(100, limit));
        assert!(record.within_window(129, limit));
        assert!(!record.within_window(130, limit));
        assert!(!record.within_window(200, limit));
    }

    #[test]
    fn test_cooldown_elapsed_at_boundary() {
        let record = RateLimitRecord {
            window_started_at: 100,
            count: 3,
            cooldown_started_at: Some(110),
        };
        let wait = Duration::from_secs(60);

        assert!(!record.cooldown_elapsed(169, wait));
        assert!(record.cooldown_elapsed(170, wait));
        assert!(record.cooldown_elapsed(171, wait));
    }

    #[test]
    fn test_cooldown_elapsed_without_cooldown() {
        let record = RateLimitRecord::fresh(100);
        assert!(!record.cooldown_elapsed(1_000_000, Duration::from_secs(0)));
    }

    #[test]
    fn test_wait_remaining_decreases() {
        let record = RateLimitRecord {
            window_started_at: 100,
            count: 3,
            cooldown_started_at: Some(110),
        };
        let wait = Duration::from_secs(60);

        assert_eq!(record.wait_remaining(110, wait), Duration::from_secs(60));
        assert_eq!(record.wait_remaining(140, wait), Duration::from_secs(30));
        assert_eq!(record.wait_remaining(170, wait), Duration::ZERO);
        assert_eq!(record.wait_remaining(999, wait), Duration::ZERO);
    }

    #[test]
    fn test_serialization_round_trip() {
        let record = RateLimitRecord {
            window_started_at: 100,
            count: 2,
            cooldown_started_at: Some(105),
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: RateLimitRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_absent_cooldown_is_omitted_and_defaulted() {
        let json = serde_json::to_string(&RateLimitRecord::fresh(7)).unwrap();
        assert!(!json.contains("cooldown_started_at"));

        let back: RateLimitRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cooldown_started_at, None);
    }
}
