//! Observers that turn broker events into log lines, or fan them out.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::{
    BrokerError, BrokerState, Disposition, HandlerError, Message, ResolutionOutcome,
    SchemaHandle, SchemaResolutionError,
};
use crate::ports::outbound::BrokerObserver;

/// Default observer: one structured `tracing` event per broker event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl BrokerObserver for TracingObserver {
    fn schema_resolved(&self, subject: &str, handle: &SchemaHandle, outcome: ResolutionOutcome) {
        debug!(
            subject,
            schema_id = handle.id(),
            outcome = outcome.as_str(),
            "schema handle stored"
        );
    }

    fn schema_resolution_failed(&self, error: &SchemaResolutionError) {
        warn!(subject = %error.subject, error = %error.source, "schema resolution failed");
    }

    fn published(&self, topic: &str) {
        debug!(topic, "message published");
    }

    fn publish_failed(&self, topic: &str, error: &BrokerError) {
        warn!(topic, kind = ?error.kind(), error = %error, "publish failed");
    }

    fn handler_retry(&self, topic: &str, attempt: u32, delay: Duration, error: &HandlerError) {
        debug!(
            topic,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "handler retry scheduled"
        );
    }

    fn delivery_completed(
        &self,
        message: &Message,
        disposition: Disposition,
        attempts: u32,
        elapsed: Duration,
    ) {
        match disposition {
            Disposition::Ack => debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "delivery acked"
            ),
            Disposition::AckExhausted | Disposition::Nack => warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                attempts,
                disposition = disposition.as_str(),
                "delivery gave up"
            ),
        }
    }

    fn worker_started(&self, topic: &str, partition: i32) {
        debug!(topic, partition, "worker started");
    }

    fn worker_stopped(&self, topic: &str, partition: i32) {
        debug!(topic, partition, "worker stopped");
    }

    fn lifecycle_changed(&self, from: BrokerState, to: BrokerState) {
        info!(from = ?from, to = ?to, "broker state changed");
    }
}

/// Forwards every event to each inner observer in order.
#[derive(Clone, Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn BrokerObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<Arc<dyn BrokerObserver>>) -> Self {
        Self { observers }
    }

    #[must_use]
    pub fn with(mut self, observer: Arc<dyn BrokerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for FanoutObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl BrokerObserver for FanoutObserver {
    fn schema_resolved(&self, subject: &str, handle: &SchemaHandle, outcome: ResolutionOutcome) {
        for o in &self.observers {
            o.schema_resolved(subject, handle, outcome);
        }
    }

    fn schema_resolution_failed(&self, error: &SchemaResolutionError) {
        for o in &self.observers {
            o.schema_resolution_failed(error);
        }
    }

    fn published(&self, topic: &str) {
        for o in &self.observers {
            o.published(topic);
        }
    }

    fn publish_failed(&self, topic: &str, error: &BrokerError) {
        for o in &self.observers {
            o.publish_failed(topic, error);
        }
    }

    fn handler_retry(&self, topic: &str, attempt: u32, delay: Duration, error: &HandlerError) {
        for o in &self.observers {
            o.handler_retry(topic, attempt, delay, error);
        }
    }

    fn delivery_completed(
        &self,
        message: &Message,
        disposition: Disposition,
        attempts: u32,
        elapsed: Duration,
    ) {
        for o in &self.observers {
            o.delivery_completed(message, disposition, attempts, elapsed);
        }
    }

    fn worker_started(&self, topic: &str, partition: i32) {
        for o in &self.observers {
            o.worker_started(topic, partition);
        }
    }

    fn worker_stopped(&self, topic: &str, partition: i32) {
        for o in &self.observers {
            o.worker_stopped(topic, partition);
        }
    }

    fn lifecycle_changed(&self, from: BrokerState, to: BrokerState) {
        for o in &self.observers {
            o.lifecycle_changed(from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver {
        published: AtomicUsize,
    }

    impl BrokerObserver for CountingObserver {
        fn published(&self, _topic: &str) {
            self.published.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fanout_reaches_every_observer() {
        let a = Arc::new(CountingObserver::default());
        let b = Arc::new(CountingObserver::default());
        let fanout = FanoutObserver::default()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(TracingObserver));
        assert_eq!(fanout.len(), 3);

        fanout.published("orders");
        fanout.published("orders");

        assert_eq!(a.published.load(Ordering::SeqCst), 2);
        assert_eq!(b.published.load(Ordering::SeqCst), 2);
    }
}
