//! # Retry Policy
//!
//! Bounded exponential backoff parameters for handler failures. The elapsed
//! time budget bounds the total retry duration independent of the attempt
//! count.

use std::time::Duration;

use super::errors::BrokerError;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MULTIPLIER: f64 = 2.5;
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first invocation. `5` means up to 6 invocations.
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
    /// Ack (drop) a poison message instead of nacking it.
    pub ack_after_max_retries: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: DEFAULT_MAX_ELAPSED_TIME,
            ack_after_max_retries: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(BrokerError::InvalidConfig(format!(
                "retry multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        if self.initial_interval.is_zero() {
            return Err(BrokerError::InvalidConfig(
                "retry initial interval must be positive".into(),
            ));
        }
        if self.max_elapsed_time.is_zero() {
            return Err(BrokerError::InvalidConfig(
                "retry max elapsed time must be positive; use max_retries = 0 to disable retries"
                    .into(),
            ));
        }
        if self.max_interval < self.initial_interval {
            return Err(BrokerError::InvalidConfig(format!(
                "retry max interval {:?} is below initial interval {:?}",
                self.max_interval, self.initial_interval
            )));
        }
        Ok(())
    }
}
