//! Token-bucket bandwidth limiter shared by every active transfer.
//!
//! Budget is measured in bytes and refills continuously at `bytes_per_sec`.
//! The bucket holds at most one second of budget. A chunk larger than the
//! available budget is admitted once the bucket is full enough for it (or
//! full, for chunks larger than the burst) and drives the balance negative,
//! so the next caller waits proportionally longer. `acquire` calls are
//! serialized by the bucket mutex; waiting happens outside the lock.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::control::{JobSignal, Stop};

#[derive(Debug)]
struct Bucket {
    /// Available bytes; negative after an oversized chunk.
    tokens: f64,
    last_refill: Instant,
}

/// Shared byte-rate limiter. `None` rate means unlimited.
#[derive(Debug)]
pub struct RateLimiter {
    rate: Option<f64>,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `bytes_per_sec` (None or 0 = unlimited).
    pub fn new(bytes_per_sec: Option<u64>) -> Self {
        let rate = bytes_per_sec.filter(|r| *r > 0).map(|r| r as f64);
        let burst = rate.unwrap_or(0.0);
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take `n` bytes of budget. Returns the time to wait before trying again.
    fn try_take(&self, n: u64) -> Option<Duration> {
        let rate = self.rate?;
        let mut bucket = self.bucket.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(self.burst);
        bucket.last_refill = now;

        let need = (n as f64).min(self.burst);
        if bucket.tokens >= need {
            bucket.tokens -= n as f64;
            return None;
        }
        let deficit = need - bucket.tokens;
        Some(Duration::from_secs_f64(deficit / rate))
    }

    /// Block until `n` bytes of budget are available. Wakes early and returns
    /// the stop reason if the job is paused or cancelled while waiting.
    pub fn acquire(&self, n: u64, signal: &JobSignal) -> Result<(), Stop> {
        loop {
            match self.try_take(n) {
                None => return Ok(()),
                Some(wait) => {
                    if let Some(stop) = signal.wait_timeout(wait) {
                        return Err(stop);
                    }
                }
            }
        }
    }
}
