//! Global rate limiting for remote writes using the token bucket algorithm.
//!
//! The remote API enforces a single process-wide write budget, not a
//! per-recipient one, so unlike a mail transfer agent's per-domain
//! limiter this tracks exactly one bucket.
//!
//! # Token Bucket Algorithm
//!
//! - Tokens are added to the bucket at a constant rate (`writes_per_second`)
//! - Each write consumes one token
//! - If no tokens are available, the caller waits the reported duration
//! - The bucket has a capacity equal to the per-second rate (no extra burst)

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Token bucket for the remote database's single global write budget.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(writes_per_second: f64) -> Self {
        Self {
            tokens: writes_per_second,
            capacity: writes_per_second,
            refill_rate: writes_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let seconds = (1.0 - self.tokens) / self.refill_rate;
        Duration::from_secs_f64(seconds)
    }
}

/// Bounds writes to the remote database to `writes_per_second`, blocking
/// callers via `acquire` rather than rejecting them — the Projector
/// should always eventually make progress, just not all at once.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(writes_per_second: f64) -> Self {
        Self { bucket: Mutex::new(TokenBucket::new(writes_per_second)) }
    }

    /// Wait until a write slot is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                if bucket.try_consume() {
                    return;
                }
                bucket.time_until_available()
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_bursts_up_to_capacity_then_blocks() {
        let limiter = RateLimiter::new(5.0);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // five tokens consumed instantly, within the starting capacity.
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocks_when_bucket_is_exhausted() {
        let limiter = RateLimiter::new(50.0);
        for _ in 0..50 {
            limiter.acquire().await;
        }
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
