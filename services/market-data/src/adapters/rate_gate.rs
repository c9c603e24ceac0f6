//! Token-bucket gate in front of one upstream provider
//!
//! `try_acquire` never blocks: when the bucket is empty the caller gets the
//! time until the next token and decides how to back off. `acquire` waits
//! for the token instead.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = f64::min(self.capacity, self.tokens + elapsed * self.refill_rate);
        self.last_update = now;
    }
}

/// Upstream request budget for one adapter.
pub struct RateGate {
    bucket: Mutex<Bucket>,
}

impl RateGate {
    /// `capacity` burst requests, refilled at `refill_per_sec`.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                capacity: capacity as f64,
                tokens: capacity as f64,
                refill_rate: refill_per_sec,
                last_update: Instant::now(),
            }),
        }
    }

    /// Take one token, or return how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(secs_or_max(missing / bucket.refill_rate))
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Spacing between requests that the refill rate sustains.
    pub fn sustained_interval(&self) -> Duration {
        let bucket = self.bucket.lock();
        secs_or_max(1.0 / bucket.refill_rate)
    }
}

/// A gate that never refills waits forever rather than panicking.
fn secs_or_max(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
