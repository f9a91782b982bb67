//! Token bucket implementation.

use std::time::Instant;

/// A single key's token bucket.
///
/// The bucket starts full and refills continuously at `fill_rate` tokens
/// per second, never above `capacity`. It is not synchronized on its own;
/// stores hand it out behind a mutex so refill and debit happen together.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum number of tokens
    capacity: f64,
    /// Tokens added per second
    fill_rate: f64,
    /// Current token level
    tokens: f64,
    /// When tokens were last refilled
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: f64, fill_rate: f64) -> Self {
        Self::new_at(capacity, fill_rate, Instant::now())
    }

    /// Create a full bucket whose clock starts at `now`.
    pub fn new_at(capacity: f64, fill_rate: f64, now: Instant) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            fill_rate: fill_rate.max(0.0),
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Refill, then try to take `n` tokens.
    ///
    /// Returns `true` if the tokens were taken.
    pub fn consume(&mut self, n: f64) -> bool {
        self.consume_at(n, Instant::now())
    }

    /// Same as [`Self::consume`] with an explicit clock reading.
    pub fn consume_at(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Current token level, as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum token level.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn fill_rate(&self) -> f64 {
        self.fill_rate
    }

    fn refill(&mut self, now: Instant) {
        // A clock reading older than last_refill adds nothing.
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.fill_rate).min(self.capacity);
        self.last_refill = self.last_refill.max(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_consume_admits_second_rejects() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(1.0, 1.0, start);

        assert!(bucket.consume_at(1.0, start));
        assert!(!bucket.consume_at(1.0, start));
    }

    #[test]
    fn test_refill_recovers_after_a_second() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(1.0, 1.0, start);

        assert!(bucket.consume_at(1.0, start));
        assert!(!bucket.consume_at(1.0, start + Duration::from_millis(500)));
        assert!(bucket.consume_at(1.0, start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_failed_consume_still_advances_clock() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(1.0, 2.0, start);

        assert!(bucket.consume_at(1.0, start));
        // 250ms at 2/s leaves half a token
        assert!(!bucket.consume_at(1.0, start + Duration::from_millis(250)));
        assert!((bucket.tokens() - 0.5).abs() < 1e-9);
        assert!(bucket.consume_at(1.0, start + Duration::from_millis(500)));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(3.0, 100.0, start);

        assert!(bucket.consume_at(1.0, start + Duration::from_secs(3600)));
        assert_eq!(bucket.tokens(), 2.0);
    }

    #[test]
    fn test_tokens_stay_in_bounds() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(5.0, 0.7, start);

        let mut now = start;
        for step in 0..200u64 {
            now += Duration::from_millis((step * 37) % 400);
            bucket.consume_at(((step % 3) + 1) as f64, now);
            assert!(bucket.tokens() >= 0.0);
            assert!(bucket.tokens() <= bucket.capacity());
        }
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut bucket = TokenBucket::new_at(1.0, 1.0, start);

        assert!(bucket.consume_at(1.0, start));
        assert!(!bucket.consume_at(1.0, start - Duration::from_secs(5)));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_zero_rate_never_refills() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(2.0, 0.0, start);

        assert!(bucket.consume_at(1.0, start));
        assert!(bucket.consume_at(1.0, start));
        assert!(!bucket.consume_at(1.0, start + Duration::from_secs(60)));
    }
}
