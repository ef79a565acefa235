//! Per-session sliding window message limiter

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_MESSAGES_PER_SECOND: usize = 20;

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            window: Duration::from_secs(1),
            hits: VecDeque::with_capacity(limit),
        }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Count a message at `now`; false if the window is already full
    pub fn allow_at(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() >= self.limit {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGES_PER_SECOND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_limits_and_slides() {
        let mut limiter = RateLimiter::new(3);
        let start = Instant::now();

        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start + Duration::from_millis(100)));
        assert!(limiter.allow_at(start + Duration::from_millis(200)));
        assert!(!limiter.allow_at(start + Duration::from_millis(300)));

        // First hit leaves the window
        assert!(limiter.allow_at(start + Duration::from_millis(1000)));
        assert!(!limiter.allow_at(start + Duration::from_millis(1050)));
        assert!(limiter.allow_at(start + Duration::from_millis(1200)));
    }
}
