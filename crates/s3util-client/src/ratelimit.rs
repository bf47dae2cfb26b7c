//! Read-rate limiting
//!
//! A token bucket where one token is one byte. Every download owned by an
//! `S3Util` draws from the same bucket, so the configured ceiling applies to
//! the aggregate read rate rather than to each request.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

/// Token bucket rate limiter
///
/// - Tokens are added at a fixed rate (`rate` per second)
/// - Tokens accumulate up to `burst`
/// - Each read consumes one token per byte
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    /// Tokens added per second
    rate: u64,
    /// Maximum tokens
    burst: u64,
}

impl TokenBucket {
    /// Create a full bucket
    ///
    /// # Arguments
    /// * `rate` - Tokens per second (sustained rate), must be non-zero
    /// * `burst` - Maximum tokens (burst capacity)
    #[must_use]
    pub fn new(rate: u64, burst: u64) -> Self {
        let burst = burst.max(1);
        Self {
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            rate: rate.max(1),
            burst,
        }
    }

    /// Bucket allowing `bytes_per_sec` with one second of burst
    #[must_use]
    pub fn per_second(bytes_per_sec: u64) -> Self {
        Self::new(bytes_per_sec, bytes_per_sec)
    }

    /// Wait until `count` tokens have been acquired
    ///
    /// Requests above the burst size are granted once the bucket is full.
    pub async fn acquire(&self, count: u64) {
        while let Some(wait) = self.try_acquire_or_wait(count) {
            tokio::time::sleep(wait).await;
        }
    }

    /// Take tokens, or return how long until enough are available
    fn try_acquire_or_wait(&self, count: u64) -> Option<Duration> {
        let needed = count.min(self.burst);
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= needed {
            state.tokens -= needed;
            return None;
        }

        let missing = needed - state.tokens;
        let micros = missing.saturating_mul(1_000_000).div_ceil(self.rate);
        Some(Duration::from_micros(micros.max(1)))
    }

    /// Refill tokens based on elapsed time
    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed_us = u64::try_from(now.duration_since(state.last_refill).as_micros())
            .unwrap_or(u64::MAX);
        let new_tokens = elapsed_us.saturating_mul(self.rate) / 1_000_000;

        if new_tokens > 0 {
            state.tokens = state.tokens.saturating_add(new_tokens).min(self.burst);
            state.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_served_without_waiting() {
        let bucket = TokenBucket::new(10, 100);
        let start = Instant::now();
        bucket.acquire(60).await;
        bucket.acquire(40).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        bucket.acquire(10).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_needs_full_bucket() {
        let bucket = TokenBucket::new(1_000, 10);
        let start = Instant::now();
        bucket.acquire(1_000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        bucket.acquire(1_000).await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::per_second(1_000);
        bucket.acquire(1_000).await;

        let start = Instant::now();
        bucket.acquire(500).await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
