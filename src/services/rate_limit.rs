use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Waits until one more request may be sent.
    async fn acquire(&self);
}

/// Allows bursts of up to `capacity` requests, refilled at one token per
/// `period / capacity`. Starts full.
pub struct TokenBucket {
    capacity: f64,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_period: u32, period: Duration) -> Self {
        let requests = requests_per_period.max(1);
        Self {
            capacity: f64::from(requests),
            refill_interval: period / requests,
            state: Mutex::new(BucketState {
                tokens: f64::from(requests),
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        if self.refill_interval.is_zero() {
            state.tokens = self.capacity;
        } else {
            let earned = now.duration_since(state.last_refill).as_secs_f64()
                / self.refill_interval.as_secs_f64();
            state.tokens = (state.tokens + earned).min(self.capacity);
        }
        state.last_refill = now;
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                // Float drift after an exact sleep must not cost another round.
                if state.tokens >= 1.0 - 1e-9 {
                    state.tokens = (state.tokens - 1.0).max(0.0);
                    return;
                }
                self.refill_interval.mul_f64(1.0 - state.tokens)
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

/// No pacing at all.
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn acquire(&self) {}
}
