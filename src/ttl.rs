//! Explicit cache-with-TTL for time-varying values.
//!
//! A `TtlCell` never refreshes itself; the owner checks `is_stale` and calls
//! `refresh` with a newly fetched value.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TtlCell<T> {
    value: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { value: None, ttl }
    }

    /// True when empty or when `ttl` has elapsed since the last refresh.
    pub fn is_stale(&self, now: Instant) -> bool {
        match &self.value {
            Some((_, fetched_at)) => now.saturating_duration_since(*fetched_at) >= self.ttl,
            None => true,
        }
    }

    pub fn refresh(&mut self, value: T, now: Instant) {
        self.value = Some((value, now));
    }

    /// The cached value, stale or not.
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref().map(|(v, _)| v)
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_staleness() {
        let mut cell = TtlCell::new(Duration::from_secs(300));
        assert!(cell.is_stale(Instant::now()));

        cell.refresh("127.0.0.1:9001", Instant::now());
        assert!(!cell.is_stale(Instant::now()));
        assert_eq!(cell.get(), Some(&"127.0.0.1:9001"));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cell.is_stale(Instant::now()));
        assert_eq!(cell.get(), Some(&"127.0.0.1:9001"));

        cell.invalidate();
        assert!(cell.get().is_none());
    }
}
