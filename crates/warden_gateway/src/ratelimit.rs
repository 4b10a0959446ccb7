//! Process-wide token bucket for outbound HTTP.

use std::sync::Mutex;
use std::time::Instant;

/// Token bucket limiter: `rps` refill with a `burst` ceiling.
///
/// Shared by every concurrent run; exhaustion denies immediately rather
/// than queueing the syscall.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rps: f64,
    burst: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    /// Create a bucket, full at `burst` tokens
    #[must_use]
    pub fn new(rps: u32, burst: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                refilled_at: Instant::now(),
            }),
            rps: f64::from(rps),
            burst: f64::from(burst),
        }
    }

    /// Take one token. Returns false when the bucket is empty.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rps).min(self.burst);
        state.refilled_at = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
