//! Token-bucket rate limiter for outbound protocol traffic.

use std::time::{Duration, Instant};

/// A bucket of `limit` tokens refilled every `interval`. Callers that fail
/// an `attempt` should sleep until `next_refill`.
#[derive(Debug)]
pub struct RateLimit {
    tokens: u64,
    last_refilled: Instant,
    limit: u64,
    interval: Duration,
}

impl RateLimit {
    pub fn new(limit: u64, interval: Duration) -> Self {
        RateLimit {
            tokens: limit,
            last_refilled: Instant::now(),
            limit,
            interval,
        }
    }

    /// Takes one token if available, refilling first when the interval has
    /// elapsed.
    pub fn attempt(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.last_refilled + self.interval {
            self.tokens = self.limit.max(self.tokens + self.limit);
            self.last_refilled = now;
        }

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// The instant at which tokens become available again.
    pub fn next_refill(&self) -> Instant {
        self.last_refilled + self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_exhausts() {
        let mut rate = RateLimit::new(3, Duration::from_secs(30));
        assert!(rate.attempt());
        assert!(rate.attempt());
        assert!(rate.attempt());
        assert!(!rate.attempt());
    }

    #[test]
    fn test_refill_after_interval() {
        let mut rate = RateLimit::new(1, Duration::from_millis(0));
        assert!(rate.attempt());
        // zero interval means every attempt refills
        assert!(rate.attempt());
    }
}
