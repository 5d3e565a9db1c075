//! Token bucket rate limiting shared by every run using one adapter.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

fn default_capacity() -> u32 {
    10
}

fn default_refill_per_sec() -> f64 {
    5.0
}

/// Rate limit configuration for one adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Burst size.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Tokens added per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill_per_sec(),
        }
    }
}

impl RateLimitConfig {
    /// Creates a configuration.
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket.
///
/// `acquire` waits outside the lock, so dropping the future (for example
/// when a run is cancelled) never leaves the bucket locked.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.capacity.max(1));
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec.max(0.0),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Takes a token if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available.
    #[must_use]
    pub fn remaining(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Time until the next token becomes available, or `None` if the bucket
    /// never refills.
    #[must_use]
    pub fn time_until_token(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            Some(Duration::ZERO)
        } else if self.refill_per_sec <= 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec))
        }
    }

    /// Waits until a token is available and takes it.
    ///
    /// Returns false if the bucket is empty and never refills.
    pub async fn acquire(&self) -> bool {
        loop {
            if self.try_acquire() {
                return true;
            }
            match self.time_until_token() {
                Some(wait) => tokio::time::sleep(wait.max(Duration::from_millis(1))).await,
                None => return false,
            }
        }
    }
}
