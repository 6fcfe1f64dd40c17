//! Token-bucket rate limiter for the automation host API.
//!
//! The local host throttles aggressively, so every caller in the process
//! (reconciliation, onboarding, UI actions) shares one limiter and
//! acquires a token before each RPC. Exhaustion queues the caller -- it
//! never fails a request.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket refilled continuously at `max_requests / per`.
pub struct RateLimiter {
    max_tokens: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Allow `max_requests` per `per` window. The bucket starts full.
    pub fn new(max_requests: u32, per: Duration) -> Self {
        let max_tokens = f64::from(max_requests.max(1));
        Self {
            max_tokens,
            refill_per_sec: max_tokens / per.as_secs_f64().max(f64::EPSILON),
            state: Mutex::new(BucketState {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Convenience: `rate` requests per second.
    pub fn per_second(rate: u32) -> Self {
        Self::new(rate, Duration::from_secs(1))
    }

    /// Acquire one token, sleeping until the bucket refills if empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens =
                    (state.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Acquire a token, then run `f`.
    pub async fn run<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        f().await
    }
}

// ── Tests ───────────────────────────────────────────────────────────
