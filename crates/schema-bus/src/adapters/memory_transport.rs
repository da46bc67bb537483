//! # In-Memory Transport
//!
//! A partitioned log held in process. Keyed messages hash to a fixed
//! partition; unkeyed ones are spread round-robin. Each partition is a queue
//! consumed in order:
//!
//! - `ack` drops the in-flight message.
//! - `nack` puts it back at the head and pauses the partition for the
//!   resend delay, so later messages never overtake it.
//! - `close` ends every open stream and rejects further calls.
//!
//! Consumer groups are not modelled: every subscription competes for the
//! same queues.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::domain::{Message, OutboundMessage, TransportError};
use crate::ports::outbound::{
    Acknowledger, Delivery, PartitionStream, StaticSubscription, SubscribeOptions, Subscription,
    Transport,
};

/// Counters for one topic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
    /// Messages waiting in the queues, in-flight ones excluded.
    pub pending: usize,
}

#[derive(Default)]
struct TopicCounters {
    published: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
}

struct PartitionLog {
    id: i32,
    queue: Mutex<VecDeque<Message>>,
    paused_until: Mutex<Option<Instant>>,
    next_offset: AtomicI64,
    notify: Notify,
}

impl PartitionLog {
    fn new(id: i32) -> Self {
        Self {
            id,
            queue: Mutex::new(VecDeque::new()),
            paused_until: Mutex::new(None),
            next_offset: AtomicI64::new(0),
            notify: Notify::new(),
        }
    }
}

struct TopicLog {
    name: String,
    partitions: Vec<Arc<PartitionLog>>,
    counters: TopicCounters,
}

pub struct InMemoryTransport {
    partitions: usize,
    nack_resend_delay: Duration,
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
    round_robin: AtomicUsize,
    close_calls: AtomicUsize,
    closed: CancellationToken,
}

impl InMemoryTransport {
    /// Transport with `partitions` partitions per topic and no resend delay.
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            nack_resend_delay: Duration::ZERO,
            topics: RwLock::new(HashMap::new()),
            round_robin: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_nack_resend_delay(mut self, delay: Duration) -> Self {
        self.nack_resend_delay = delay;
        self
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Append directly to one partition.
    pub fn publish_to(
        &self,
        topic: &str,
        partition: usize,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        if partition >= self.partitions {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: format!(
                    "partition {partition} out of range (topic has {})",
                    self.partitions
                ),
            });
        }
        let log = self.topic_log(topic);
        let part = &log.partitions[partition];
        let offset = part.next_offset.fetch_add(1, Ordering::SeqCst);
        part.queue
            .lock()
            .push_back(Message::from_outbound(topic, part.id, offset, message));
        log.counters.published.fetch_add(1, Ordering::SeqCst);
        part.notify.notify_one();
        trace!(topic, partition, offset, "message appended");
        Ok(())
    }

    pub fn stats(&self, topic: &str) -> TopicStats {
        let topics = self.topics.read();
        let Some(log) = topics.get(topic) else {
            return TopicStats::default();
        };
        TopicStats {
            published: log.counters.published.load(Ordering::SeqCst),
            acked: log.counters.acked.load(Ordering::SeqCst),
            nacked: log.counters.nacked.load(Ordering::SeqCst),
            pending: log.partitions.iter().map(|p| p.queue.lock().len()).sum(),
        }
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn topic_log(&self, topic: &str) -> Arc<TopicLog> {
        if let Some(log) = self.topics.read().get(topic) {
            return log.clone();
        }
        self.topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| {
                Arc::new(TopicLog {
                    name: topic.to_string(),
                    partitions: (0..self.partitions)
                        .map(|id| Arc::new(PartitionLog::new(id as i32)))
                        .collect(),
                    counters: TopicCounters::default(),
                })
            })
            .clone()
    }

    fn choose_partition(&self, key: Option<&[u8]>) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions as u64) as usize
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % self.partitions,
        }
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("partitions", &self.partitions)
            .field("nack_resend_delay", &self.nack_resend_delay)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), TransportError> {
        let partition = self.choose_partition(message.key.as_deref());
        self.publish_to(topic, partition, message)
    }

    async fn subscribe(
        &self,
        topic: &str,
        _options: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        self.ensure_open()?;
        let log = self.topic_log(topic);
        let streams = log
            .partitions
            .iter()
            .map(|partition| {
                Box::new(InMemoryPartitionStream {
                    topic: log.clone(),
                    log: partition.clone(),
                    nack_resend_delay: self.nack_resend_delay,
                    closed: self.closed.clone(),
                }) as Box<dyn PartitionStream>
            })
            .collect();
        Ok(Box::new(StaticSubscription::new(streams)))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }
}

// =============================================================================
// CONSUMER SIDE
// =============================================================================

struct InMemoryPartitionStream {
    topic: Arc<TopicLog>,
    log: Arc<PartitionLog>,
    nack_resend_delay: Duration,
    closed: CancellationToken,
}

#[async_trait]
impl PartitionStream for InMemoryPartitionStream {
    fn partition(&self) -> i32 {
        self.log.id
    }

    async fn recv(&mut self) -> Option<Result<Delivery, TransportError>> {
        loop {
            if self.closed.is_cancelled() {
                return None;
            }

            let paused_until = *self.log.paused_until.lock();
            if let Some(deadline) = paused_until {
                if deadline > Instant::now() {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.closed.cancelled() => return None,
                    }
                    continue;
                }
            }

            let next = self.log.queue.lock().pop_front();
            if let Some(message) = next {
                let acker = InMemoryAcker {
                    topic: self.topic.clone(),
                    log: self.log.clone(),
                    message: message.clone(),
                    nack_resend_delay: self.nack_resend_delay,
                };
                return Some(Ok(Delivery::new(message, Box::new(acker))));
            }

            tokio::select! {
                _ = self.log.notify.notified() => {}
                _ = self.closed.cancelled() => return None,
            }
        }
    }
}

struct InMemoryAcker {
    topic: Arc<TopicLog>,
    log: Arc<PartitionLog>,
    message: Message,
    nack_resend_delay: Duration,
}

impl Acknowledger for InMemoryAcker {
    fn ack(&self) -> Result<(), TransportError> {
        self.topic.counters.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn nack(&self) -> Result<(), TransportError> {
        self.topic.counters.nacked.fetch_add(1, Ordering::SeqCst);
        if !self.nack_resend_delay.is_zero() {
            *self.log.paused_until.lock() = Some(Instant::now() + self.nack_resend_delay);
        }
        self.log.queue.lock().push_front(self.message.clone());
        self.log.notify.notify_one();
        trace!(
            topic = %self.topic.name,
            partition = self.log.id,
            offset = self.message.offset,
            "message requeued"
        );
        Ok(())
    }
}
