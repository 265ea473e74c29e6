//! Reconnect backoff: exponential with jitter, bounded by an attempt cap.

use std::time::Duration;

use rand::Rng;

use crate::config::ConnectionConfig;

/// Calculate exponential backoff delay with jitter.
///
/// Attempt 1 waits `base_ms`, doubling per attempt up to `max_ms`, plus
/// 0–10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Reconnect schedule for one connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_ms: u64,
    max_ms: u64,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            max_attempts,
            attempts: 0,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            config.reconnect_interval_ms,
            config.max_reconnect_interval_ms,
            config.max_reconnect_attempts,
        )
    }

    /// Record a failed attempt. Returns the delay before the next one, or
    /// `None` once the cap is reached.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.exhausted() {
            return None;
        }
        Some(calculate_backoff(self.attempts, self.base_ms, self.max_ms))
    }

    /// Delay before reconnecting after an established connection was lost.
    /// Does not consume an attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 110);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000 && max.as_millis() < 1100);
    }

    #[test]
    fn test_policy_stops_at_cap() {
        let mut policy = ReconnectPolicy::new(10, 100, 3);
        assert!(policy.record_failure().is_some());
        assert!(policy.record_failure().is_some());
        assert!(policy.record_failure().is_none());
        assert!(policy.exhausted());

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert!(!policy.exhausted());
    }
}
