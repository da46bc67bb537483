//! # Retry Middleware
//!
//! Runs a handler with bounded exponential backoff. Sleeps happen on the
//! calling worker only, so other partitions keep flowing. Once the budget
//! is spent the message is acked (poison drop) or nacked, per policy.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, warn};

use crate::algorithms::ExponentialBackoff;
use crate::codec::Envelope;
use crate::domain::{Disposition, RetryPolicy};
use crate::ports::inbound::MessageHandler;
use crate::ports::outbound::BrokerObserver;

/// Result of running one delivery through the retry loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryOutcome {
    pub disposition: Disposition,
    /// Handler invocations, including the first.
    pub attempts: u32,
    pub elapsed: Duration,
}

pub struct RetryMiddleware {
    policy: RetryPolicy,
    observer: Arc<dyn BrokerObserver>,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy, observer: Arc<dyn BrokerObserver>) -> Self {
        Self { policy, observer }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run(&self, handler: &dyn MessageHandler, envelope: &Envelope) -> RetryOutcome {
        let started = Instant::now();
        let mut backoff = ExponentialBackoff::new(&self.policy);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match handler.handle(envelope).await {
                Ok(()) => {
                    return RetryOutcome {
                        disposition: Disposition::Ack,
                        attempts,
                        elapsed: started.elapsed(),
                    }
                }
                Err(err) => err,
            };

            let topic = envelope.topic().name();
            match backoff.next_delay(started.elapsed()) {
                Some(delay) => {
                    warn!(
                        topic,
                        attempt = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "handler failed, retrying"
                    );
                    self.observer.handler_retry(topic, attempts, delay, &err);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    let disposition = if self.policy.ack_after_max_retries {
                        Disposition::AckExhausted
                    } else {
                        Disposition::Nack
                    };
                    error!(
                        topic,
                        attempts,
                        offset = envelope.message().offset,
                        partition = envelope.message().partition,
                        disposition = disposition.as_str(),
                        error = %err,
                        "retry budget exhausted"
                    );
                    return RetryOutcome {
                        disposition,
                        attempts,
                        elapsed: started.elapsed(),
                    };
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryMiddleware")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
