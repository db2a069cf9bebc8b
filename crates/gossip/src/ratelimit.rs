use std::time::Duration;

use tokio::time::Instant;

/// Token bucket limiting query replies: `burst` replies pass undelayed,
/// after which tokens refill at `1 / interval`. The caller sleeps whatever
/// delay `acquire` returns before proceeding.
pub struct TokenBucket {
    burst: f64,
    rate_per_sec: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(burst: usize, interval: Duration, now: Instant) -> Self {
        let burst = burst.max(1) as f64;
        TokenBucket {
            burst,
            rate_per_sec: 1.0 / interval.as_secs_f64().max(f64::MIN_POSITIVE),
            tokens: burst,
            last: now,
        }
    }

    /// Takes one token, returning how long the caller must wait before the
    /// token it consumed actually exists. `last` tracks the bucket's virtual
    /// time, so back-to-back delayed acquires queue behind each other.
    pub fn acquire(&mut self, now: Instant) -> Duration {
        if now > self.last {
            let elapsed = (now - self.last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.burst);
            self.last = now;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Duration::ZERO
        } else {
            let wait = Duration::from_secs_f64((1.0 - self.tokens) / self.rate_per_sec);
            let ready_at = self.last + wait;
            self.tokens = 0.0;
            self.last = ready_at;
            ready_at.saturating_duration_since(now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_then_spaced() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(2, Duration::from_secs(1), now);
        assert_eq!(bucket.acquire(now), Duration::ZERO);
        assert_eq!(bucket.acquire(now), Duration::ZERO);
        assert_eq!(bucket.acquire(now), Duration::from_secs(1));
        // A fourth immediate request waits for a second token.
        assert_eq!(bucket.acquire(now), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1, Duration::from_secs(1), start);
        assert_eq!(bucket.acquire(start), Duration::ZERO);
        let later = start + Duration::from_secs(3);
        assert_eq!(bucket.acquire(later), Duration::ZERO);
    }
}
