//! Token bucket limiter for outbound page fetches.

use std::time::SystemTime;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Token bucket rate limiter with a jittered gap between requests
pub struct RateLimiter {
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_update: Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    min_delay: Duration,
    max_delay: Duration,
}

impl RateLimiter {
    /// # Arguments
    /// * `requests_per_minute` - Bucket size and refill rate
    /// * `min_delay_secs` / `max_delay_secs` - Jitter range applied to every request
    pub fn new(requests_per_minute: u32, min_delay_secs: f64, max_delay_secs: f64) -> Self {
        let rpm = requests_per_minute.max(1) as f64;
        let min_delay = Duration::from_secs_f64(min_delay_secs.max(0.0));
        let max_delay = Duration::from_secs_f64(max_delay_secs.max(0.0)).max(min_delay);

        Self {
            state: Mutex::new(BucketState {
                tokens: rpm,
                last_update: Instant::now(),
                max_tokens: rpm,
                refill_rate: rpm / 60.0,
                min_delay,
                max_delay,
            }),
        }
    }

    /// Limiter for result page fetches
    pub fn for_results(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute, 0.5, 1.5)
    }

    /// Wait until a request may be sent
    pub async fn acquire(&self) {
        let delay = {
            let mut state = self.state.lock().await;
            state.take(Instant::now(), jitter())
        };
        tokio::time::sleep(delay).await;
    }
}

impl BucketState {
    fn take(&mut self, now: Instant, jitter: f64) -> Duration {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.min_delay + (self.max_delay - self.min_delay).mul_f64(jitter)
        } else {
            let wait = (1.0 - self.tokens) / self.refill_rate;
            self.tokens = 0.0;
            Duration::from_secs_f64(wait) + self.min_delay
        }
    }
}

/// Pseudo-random factor in [0, 1)
fn jitter() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(rpm: u32) -> BucketState {
        let limiter = RateLimiter::new(rpm, 0.5, 1.0);
        limiter.state.into_inner()
    }

    #[test]
    fn test_full_bucket_only_jitters() {
        let mut state = bucket(60);
        let now = state.last_update;
        assert_eq!(state.take(now, 0.0), Duration::from_millis(500));
        assert_eq!(state.take(now, 1.0), Duration::from_millis(1000));
        assert!((state.tokens - 58.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_bucket_waits_for_refill() {
        let mut state = bucket(60);
        let now = state.last_update;
        state.tokens = 0.0;
        // one token per second at 60 rpm
        let delay = state.take(now, 0.0);
        assert_eq!(delay, Duration::from_millis(1500));
        assert_eq!(state.tokens, 0.0);
    }

    #[test]
    fn test_inverted_delay_range_is_clamped() {
        let mut state = RateLimiter::new(0, 2.0, 1.0).state.into_inner();
        let now = state.last_update;
        assert_eq!(state.max_tokens, 1.0);
        assert_eq!(state.take(now, 0.7), Duration::from_secs(2));
    }
}
