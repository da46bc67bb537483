//! Shared fixtures: schemas, payload types and an in-memory broker harness.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use schema_bus::adapters::{AvroCodec, InMemorySchemaRegistry, InMemoryTransport};
use schema_bus::{
    BrokerError, BrokerObserver, HandlerBinding, MessageBroker, MessageBrokerApi, NoopObserver,
    RetryPolicy, Topic,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const ORDER_SCHEMA_V1: &str = r#"{
    "type": "record",
    "name": "Order",
    "fields": [
        {"name": "id", "type": "string"},
        {"name": "amount_cents", "type": "long"}
    ]
}"#;

pub const ORDER_SCHEMA_V2: &str = r#"{
    "type": "record",
    "name": "Order",
    "fields": [
        {"name": "id", "type": "string"},
        {"name": "amount_cents", "type": "long"},
        {"name": "note", "type": ["null", "string"], "default": null}
    ]
}"#;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub amount_cents: i64,
    pub note: Option<String>,
}

impl Order {
    pub fn new(id: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            id: id.into(),
            amount_cents,
            note: None,
        }
    }
}

/// `orders` at v2, registering its schema.
pub fn orders_topic() -> Topic {
    Topic::new("orders")
        .with_schema(2, ORDER_SCHEMA_V2)
        .register_schema(true)
}

/// Millisecond backoff so retry flows finish quickly.
pub fn fast_retry(max_retries: u32, ack_after_max_retries: bool) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_interval: Duration::from_millis(1),
        multiplier: 2.0,
        max_interval: Duration::from_millis(4),
        max_elapsed_time: Duration::from_secs(10),
        ack_after_max_retries,
    }
}

/// Broker over in-memory registry and transport with the Avro codec.
pub struct Harness {
    pub transport: Arc<InMemoryTransport>,
    pub registry: Arc<InMemorySchemaRegistry>,
    pub broker: Arc<MessageBroker>,
}

impl Harness {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with(InMemoryTransport::new(3), policy, Arc::new(NoopObserver))
    }

    pub fn with(
        transport: InMemoryTransport,
        policy: RetryPolicy,
        observer: Arc<dyn BrokerObserver>,
    ) -> Self {
        let transport = Arc::new(transport);
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let broker = MessageBroker::builder()
            .transport(transport.clone())
            .registry(registry.clone())
            .codec(Arc::new(AvroCodec::new()))
            .observer(observer)
            .retry_policy(policy)
            .consumer_group("sb-tests")
            .shutdown_timeout(Duration::from_millis(500))
            .build()
            .expect("harness broker builds");
        Self {
            transport,
            registry,
            broker: Arc::new(broker),
        }
    }

    /// Run `listen` on a task; cancel the returned token to end it.
    pub fn spawn_listen(
        &self,
        bindings: Vec<HandlerBinding>,
    ) -> (JoinHandle<Result<(), BrokerError>>, CancellationToken) {
        let cancel = CancellationToken::new();
        let broker = self.broker.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { broker.listen(bindings, token).await });
        (task, cancel)
    }
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Await a spawned listener with a bound.
pub async fn join_listener<F>(task: F) -> Result<(), BrokerError>
where
    F: Future<Output = Result<Result<(), BrokerError>, tokio::task::JoinError>>,
{
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("listener finished in time")
        .expect("listener task did not panic")
}
