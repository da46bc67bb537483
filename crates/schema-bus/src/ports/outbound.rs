//! # Outbound Ports
//!
//! Capabilities the broker consumes: schema registry, transport, codec and
//! an observer for logs/metrics. All are injected at construction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{
    BrokerError, BrokerState, CodecError, Disposition, HandlerError, Message, OutboundMessage,
    RegistryError, ResolutionOutcome, SchemaHandle, SchemaResolutionError, TransportError,
};

// =============================================================================
// SCHEMA REGISTRY
// =============================================================================

/// Remote schema registry - outbound port.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Look up the exact schema text under `subject`. `Ok(None)` when the
    /// text is not registered there.
    async fn check_registered(
        &self,
        subject: &str,
        schema: &str,
    ) -> Result<Option<SchemaHandle>, RegistryError>;

    /// Latest schema under `subject`, with its version populated.
    async fn latest(&self, subject: &str) -> Result<SchemaHandle, RegistryError>;

    /// Register `schema` under `subject`.
    async fn create(&self, subject: &str, schema: &str) -> Result<SchemaHandle, RegistryError>;
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Subscription parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub consumer_group: String,
    /// Start from the oldest retained offset when the group has none.
    pub from_oldest: bool,
}

/// Settles one delivery with the transport.
pub trait Acknowledger: Send + Sync {
    fn ack(&self) -> Result<(), TransportError>;
    fn nack(&self) -> Result<(), TransportError>;
}

/// A received message plus the handle that settles it.
pub struct Delivery {
    message: Message,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: Message, acker: Box<dyn Acknowledger>) -> Self {
        Self { message, acker }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_parts(self) -> (Message, Box<dyn Acknowledger>) {
        (self.message, self.acker)
    }

    pub fn ack(self) -> Result<(), TransportError> {
        self.acker.ack()
    }

    pub fn nack(self) -> Result<(), TransportError> {
        self.acker.nack()
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Ordered stream of deliveries from one partition.
#[async_trait]
pub trait PartitionStream: Send {
    fn partition(&self) -> i32;

    /// Next delivery. `None` once the partition is revoked or the transport
    /// closes; `Some(Err)` is fatal for the listener.
    async fn recv(&mut self) -> Option<Result<Delivery, TransportError>>;
}

/// A topic subscription. Yields one stream per assigned partition.
#[async_trait]
pub trait Subscription: Send {
    /// Next assigned partition. `None` once no further assignment will come.
    async fn next_partition(&mut self) -> Option<Box<dyn PartitionStream>>;
}

/// Log-based broker transport - outbound port.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        topic: &str,
        options: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Drain and release connections. Open streams end afterwards.
    async fn close(&self) -> Result<(), TransportError>;
}

// =============================================================================
// CODEC
// =============================================================================

/// Binary serialization against a resolved schema.
///
/// `serde_json::Value` is the neutral payload model between domain types
/// and the wire format.
pub trait Codec: Send + Sync {
    fn encode(&self, schema: &SchemaHandle, payload: &serde_json::Value)
        -> Result<Vec<u8>, CodecError>;

    fn decode(&self, schema: &SchemaHandle, bytes: &[u8]) -> Result<serde_json::Value, CodecError>;
}

// =============================================================================
// OBSERVER
// =============================================================================

/// Receives broker events for logging and metrics. Every method defaults to
/// a no-op.
#[allow(unused_variables)]
pub trait BrokerObserver: Send + Sync {
    fn schema_resolved(&self, subject: &str, handle: &SchemaHandle, outcome: ResolutionOutcome) {}

    fn schema_resolution_failed(&self, error: &SchemaResolutionError) {}

    fn published(&self, topic: &str) {}

    fn publish_failed(&self, topic: &str, error: &BrokerError) {}

    fn handler_retry(&self, topic: &str, attempt: u32, delay: Duration, error: &HandlerError) {}

    fn delivery_completed(
        &self,
        message: &Message,
        disposition: Disposition,
        attempts: u32,
        elapsed: Duration,
    ) {
    }

    fn worker_started(&self, topic: &str, partition: i32) {}

    fn worker_stopped(&self, topic: &str, partition: i32) {}

    fn lifecycle_changed(&self, from: BrokerState, to: BrokerState) {}
}

/// Observer that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl BrokerObserver for NoopObserver {}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Per-operation call counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryCalls {
    pub check: usize,
    pub latest: usize,
    pub create: usize,
}

/// Scripted registry for testing.
#[derive(Default)]
pub struct MockSchemaRegistry {
    /// Returned by `check_registered`.
    pub registered: Option<SchemaHandle>,
    /// Returned by `latest`; `None` reports the subject as unknown.
    pub latest: Option<SchemaHandle>,
    /// Id handed out by `create`.
    pub created_id: u32,
    pub fail_check: bool,
    pub fail_latest: bool,
    pub fail_create: bool,
    calls: Mutex<RegistryCalls>,
}

impl MockSchemaRegistry {
    pub fn new() -> Self {
        Self {
            created_id: 100,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> RegistryCalls {
        *self.calls.lock()
    }
}

#[async_trait]
impl SchemaRegistry for MockSchemaRegistry {
    async fn check_registered(
        &self,
        _subject: &str,
        _schema: &str,
    ) -> Result<Option<SchemaHandle>, RegistryError> {
        self.calls.lock().check += 1;
        if self.fail_check {
            return Err(RegistryError::Connection("Mock failure".to_string()));
        }
        Ok(self.registered.clone())
    }

    async fn latest(&self, subject: &str) -> Result<SchemaHandle, RegistryError> {
        self.calls.lock().latest += 1;
        if self.fail_latest {
            return Err(RegistryError::Connection("Mock failure".to_string()));
        }
        self.latest
            .clone()
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.to_string()))
    }

    async fn create(&self, _subject: &str, schema: &str) -> Result<SchemaHandle, RegistryError> {
        self.calls.lock().create += 1;
        if self.fail_create {
            return Err(RegistryError::Rejected {
                status: 409,
                message: "Mock failure".to_string(),
            });
        }
        Ok(SchemaHandle::new(self.created_id, schema))
    }
}

/// Transport that records publishes and never delivers anything.
#[derive(Default)]
pub struct MockTransport {
    pub should_fail: bool,
    published: Mutex<Vec<(String, OutboundMessage)>>,
    subscribe_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, OutboundMessage)> {
        self.published.lock().clone()
    }

    /// Total transport calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.published.lock().len()
            + self.subscribe_calls.load(Ordering::SeqCst)
            + self.close_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), TransportError> {
        if self.should_fail {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "Mock failure".to_string(),
            });
        }
        self.published.lock().push((topic.to_string(), message));
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        _options: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "Mock failure".to_string(),
            });
        }
        Ok(Box::new(StaticSubscription::default()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Subscription over a fixed set of partition streams.
#[derive(Default)]
pub struct StaticSubscription {
    streams: VecDeque<Box<dyn PartitionStream>>,
}

impl StaticSubscription {
    pub fn new(streams: Vec<Box<dyn PartitionStream>>) -> Self {
        Self {
            streams: streams.into(),
        }
    }
}

#[async_trait]
impl Subscription for StaticSubscription {
    async fn next_partition(&mut self) -> Option<Box<dyn PartitionStream>> {
        self.streams.pop_front()
    }
}
