//! Retry policy with exponential backoff and a shared retry quota.
//!
//! Every backend call is retried under one [`RetryPolicy`]. Retries also draw
//! from a [`RetryQuota`] token bucket shared by the whole run, so a backend
//! that is failing for everyone is not hammered by every task at once.
//!
//! # Example
//!
//! ```
//! use s3_tree_sync::limiter::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::from_limits(3, Duration::from_secs(1));
//! assert_eq!(policy.max_attempts, 3);
//! assert_eq!(policy.delay_before(1), Duration::from_millis(100));
//! assert_eq!(policy.delay_before(2), Duration::from_millis(200));
//!
//! // Zero retries still makes the one original attempt
//! assert_eq!(RetryPolicy::from_limits(0, Duration::from_secs(1)).max_attempts, 1);
//! ```

use parking_lot::Mutex;
use std::time::Duration;

/// Tokens one retry costs
pub const RETRY_COST: u32 = 5;

/// Tokens a retry after a timeout costs
pub const TIMEOUT_RETRY_COST: u32 = 10;

/// Tokens returned by a call that succeeded on its first attempt
pub const NO_RETRY_INCREMENT: u32 = 1;

/// Quota tokens per unit of `--max-concurrent`
pub const QUOTA_PER_SLOT: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first, at least 1
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl RetryPolicy {
    /// Policy for `--max-retries` / `--max-backoff-delay`
    pub fn from_limits(max_retries: u32, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_retries.max(1),
            initial_delay: Duration::from_millis(100).min(max_backoff),
            max_delay: max_backoff,
            factor: 2.0,
        }
    }

    /// Exactly one attempt
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Minimal delays for tests
    #[cfg(test)]
    pub fn test(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        }
    }

    /// Sleep before retry number `retry` (1-based)
    pub fn delay_before(&self, retry: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..retry {
            delay = delay.mul_f64(self.factor).min(self.max_delay);
            if delay == self.max_delay {
                break;
            }
        }
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_limits(10, Duration::from_secs(60))
    }
}

/// Shared token bucket gating retries
#[derive(Debug)]
pub struct RetryQuota {
    capacity: u32,
    available: Mutex<u32>,
}

impl RetryQuota {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
        }
    }

    /// Sized for a `--max-concurrent` budget
    pub fn for_concurrency(max_concurrent: u32) -> Self {
        Self::new(max_concurrent.saturating_mul(QUOTA_PER_SLOT))
    }

    /// Take `cost` tokens; false when the bucket cannot cover it
    pub fn try_acquire(&self, cost: u32) -> bool {
        let mut available = self.available.lock();
        if *available < cost {
            return false;
        }
        *available -= cost;
        true
    }

    /// Return tokens after a success, never above capacity
    pub fn refund(&self, amount: u32) {
        let mut available = self.available.lock();
        *available = available.saturating_add(amount).min(self.capacity);
    }

    pub fn available(&self) -> u32 {
        *self.available.lock()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
