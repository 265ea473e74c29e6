//! Per-channel dispatch rate limiting.

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, amount: f64, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }
}

/// Token bucket gating how many messages per second a channel dispatches.
/// Never blocks: a request beyond the available tokens is refused.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(messages_per_second: u32, burst_size: u32) -> Self {
        let capacity = f64::from(burst_size.max(1));
        Self {
            bucket: Mutex::new(TokenBucket::new(capacity)),
            capacity,
            refill_rate: f64::from(messages_per_second),
        }
    }

    /// `None` when rate limiting is disabled.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.messages_per_second, config.burst_size))
    }

    /// Take `messages` tokens at once, or none.
    pub fn try_acquire(&self, messages: usize) -> bool {
        self.bucket
            .lock()
            .try_acquire(messages as f64, self.capacity, self.refill_rate)
    }
}
