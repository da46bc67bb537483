//! # Exponential Backoff
//!
//! `delay(n) = min(initial * multiplier^n, max_interval)` where `n` is the
//! zero-based retry index. A schedule ends when the retry budget is spent or
//! when the next sleep would carry the elapsed time past the policy's
//! ceiling.

use std::time::Duration;

use crate::domain::RetryPolicy;

/// Delay before retry number `attempt` (zero-based).
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let ceiling = policy.max_interval.as_secs_f64();
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = policy.initial_interval.as_secs_f64() * policy.multiplier.powi(exponent);
    if !secs.is_finite() || secs >= ceiling {
        return policy.max_interval;
    }
    Duration::from_secs_f64(secs.max(0.0))
}

/// Stateful schedule for one message.
#[derive(Debug)]
pub struct ExponentialBackoff<'a> {
    policy: &'a RetryPolicy,
    retries: u32,
}

impl<'a> ExponentialBackoff<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self { policy, retries: 0 }
    }

    /// Delay before the next retry, or `None` when retrying must stop.
    pub fn next_delay(&mut self, elapsed: Duration) -> Option<Duration> {
        if self.retries >= self.policy.max_retries {
            return None;
        }
        let delay = backoff_delay(self.policy, self.retries);
        if elapsed.saturating_add(delay) > self.policy.max_elapsed_time {
            return None;
        }
        self.retries += 1;
        Some(delay)
    }

    /// Retries granted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}
