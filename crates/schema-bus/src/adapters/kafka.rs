//! # Kafka Transport
//!
//! rdkafka-backed transport, compiled with the `kafka` feature.
//!
//! ## Producer
//!
//! Idempotent `FutureProducer` with `acks=all`. Message metadata travels as
//! record headers.
//!
//! ## Consumer
//!
//! One `StreamConsumer` per subscription. A pump task reads it and routes
//! each record to a bounded per-partition channel. A partition whose worker
//! falls behind is paused at the consumer and resumed once its backlog
//! drains, so one slow partition never stalls the others.
//!
//! Offsets are stored on ack and committed by librdkafka's auto-commit.
//! A nack keeps the record in its partition stream and redelivers it after
//! the resend delay. Consumer errors are logged and retried after the
//! reconnect delay; they never end the subscription.
//!
//! A rebalance that revokes a partition ends its stream. Records still
//! buffered for it are dropped, and an ack racing the revocation is a no-op:
//! the new owner resumes from the last committed offset.
//!
//! Dropping the `Subscription` stops its pump and leaves the consumer group.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message as KafkaMessage, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::TopicPartitionList;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    BrokerConfig, Message, OutboundMessage, TlsSettings, TransportError, MESSAGE_UUID_KEY,
};
use crate::ports::outbound::{
    Acknowledger, Delivery, PartitionStream, SubscribeOptions, Subscription, Transport,
};

/// Records buffered per partition before the partition is paused.
const PARTITION_BUFFER: usize = 256;

/// How often parked records are retried against full partition buffers.
const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Connection settings shared by producer and consumers.
#[derive(Clone, Debug)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub version: Option<String>,
    pub tls: Option<TlsSettings>,
    pub publish_timeout: Duration,
    pub nack_resend_delay: Duration,
    pub reconnect_retry_delay: Duration,
}

impl KafkaSettings {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            brokers: config.brokers.clone(),
            version: config.version.clone(),
            tls: config.tls.clone(),
            publish_timeout: config
                .tls
                .as_ref()
                .map(TlsSettings::timeout)
                .unwrap_or(Duration::from_secs(10)),
            nack_resend_delay: config.nack_resend_delay(),
            reconnect_retry_delay: config.reconnect_retry_delay(),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", self.brokers.join(","));
        if let Some(version) = &self.version {
            config.set("broker.version.fallback", version);
        }
        if let Some(tls) = &self.tls {
            config.set("security.protocol", "ssl");
            set_path(&mut config, "ssl.ca.location", &tls.ca_cert_pem);
            set_path(&mut config, "ssl.certificate.location", &tls.cert_pem);
            set_path(&mut config, "ssl.key.location", &tls.key_pem);
            config.set(
                "enable.ssl.certificate.verification",
                if tls.skip_verify { "false" } else { "true" },
            );
        }
        config
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = self.client_config();
        config
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set(
                "message.timeout.ms",
                self.publish_timeout.as_millis().to_string(),
            );
        config
    }

    fn consumer_config(&self, options: &SubscribeOptions) -> ClientConfig {
        let mut config = self.client_config();
        config
            .set("group.id", &options.consumer_group)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set(
                "auto.offset.reset",
                if options.from_oldest { "earliest" } else { "latest" },
            );
        config
    }
}

fn set_path(config: &mut ClientConfig, key: &str, path: &std::path::Path) {
    if !path.as_os_str().is_empty() {
        config.set(key, path.to_string_lossy());
    }
}

fn connection_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::Connection(err.to_string())
}

/// Reports partitions revoked from this consumer to its pump.
struct PumpContext {
    topic: String,
    revoked: mpsc::UnboundedSender<i32>,
}

impl ClientContext for PumpContext {}

impl ConsumerContext for PumpContext {
    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(list) => {
                for elem in list.elements_for_topic(&self.topic) {
                    let _ = self.revoked.send(elem.partition());
                }
            }
            Rebalance::Assign(list) => {
                debug!(topic = %self.topic, partitions = list.count(), "partitions assigned");
            }
            Rebalance::Error(err) => {
                warn!(topic = %self.topic, error = %err, "rebalance failed");
            }
        }
    }
}

type PumpConsumer = StreamConsumer<PumpContext>;

// =============================================================================
// TRANSPORT
// =============================================================================

pub struct KafkaTransport {
    settings: KafkaSettings,
    producer: Option<FutureProducer>,
    closed: CancellationToken,
    pumps: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl KafkaTransport {
    /// Transport able to publish and subscribe.
    pub fn new(settings: KafkaSettings) -> Result<Self, TransportError> {
        let producer = settings
            .producer_config()
            .create::<FutureProducer>()
            .map_err(connection_error)?;
        info!(brokers = %settings.brokers.join(","), "kafka producer created");
        Ok(Self {
            settings,
            producer: Some(producer),
            closed: CancellationToken::new(),
            pumps: Mutex::new(Vec::new()),
        })
    }

    /// Transport without a producer. `publish` fails.
    pub fn consume_only(settings: KafkaSettings) -> Self {
        Self {
            settings,
            producer: None,
            closed: CancellationToken::new(),
            pumps: Mutex::new(Vec::new()),
        }
    }
}

impl std::fmt::Debug for KafkaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaTransport")
            .field("settings", &self.settings)
            .field("producer", &self.producer.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let producer = self.producer.as_ref().ok_or_else(|| TransportError::Publish {
            topic: topic.to_string(),
            reason: "transport has no producer".to_string(),
        })?;

        let headers = message
            .metadata
            .iter()
            .fold(OwnedHeaders::new_with_capacity(message.metadata.len()), |h, (k, v)| {
                h.insert(Header {
                    key: k.as_str(),
                    value: Some(v.as_bytes()),
                })
            });
        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic)
            .payload(&message.payload[..])
            .headers(headers);
        if let Some(key) = message.key.as_deref() {
            record = record.key(key);
        }

        producer
            .send(record, Timeout::After(self.settings.publish_timeout))
            .await
            .map(|_| ())
            .map_err(|(err, _)| TransportError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    async fn subscribe(
        &self,
        topic: &str,
        options: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let (revoked_tx, revoked_rx) = mpsc::unbounded_channel();
        let context = PumpContext {
            topic: topic.to_string(),
            revoked: revoked_tx,
        };
        let consumer: PumpConsumer = self
            .settings
            .consumer_config(options)
            .create_with_context(context)
            .map_err(connection_error)?;
        consumer
            .subscribe(&[topic])
            .map_err(|err| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: err.to_string(),
            })?;
        info!(topic, group = %options.consumer_group, "kafka consumer subscribed");

        let (streams_tx, streams_rx) = mpsc::unbounded_channel();
        let pump = Pump {
            consumer: Arc::new(consumer),
            topic: topic.to_string(),
            streams: streams_tx,
            routes: HashMap::new(),
            nack_resend_delay: self.settings.nack_resend_delay,
            reconnect_retry_delay: self.settings.reconnect_retry_delay,
            closed: self.closed.clone(),
        };
        self.pumps.lock().push(tokio::spawn(pump.run(revoked_rx)));

        Ok(Box::new(KafkaSubscription {
            streams: streams_rx,
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        let pumps: Vec<_> = self.pumps.lock().drain(..).collect();
        for pump in pumps {
            let _ = pump.await;
        }
        if let Some(producer) = self.producer.clone() {
            let timeout = self.settings.publish_timeout;
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(connection_error)?
                .map_err(connection_error)?;
        }
        info!("kafka transport closed");
        Ok(())
    }
}

struct KafkaSubscription {
    streams: mpsc::UnboundedReceiver<Box<dyn PartitionStream>>,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next_partition(&mut self) -> Option<Box<dyn PartitionStream>> {
        self.streams.recv().await
    }
}

// =============================================================================
// PUMP
// =============================================================================

struct PartitionRoute {
    tx: mpsc::Sender<Message>,
    parked: VecDeque<Message>,
    paused: bool,
    /// Ends the partition's stream; child of the transport's close token.
    stop: CancellationToken,
}

struct Pump {
    consumer: Arc<PumpConsumer>,
    topic: String,
    streams: mpsc::UnboundedSender<Box<dyn PartitionStream>>,
    routes: HashMap<i32, PartitionRoute>,
    nack_resend_delay: Duration,
    reconnect_retry_delay: Duration,
    closed: CancellationToken,
}

impl Pump {
    async fn run(mut self, mut revoked: mpsc::UnboundedReceiver<i32>) {
        let mut flush = tokio::time::interval(FLUSH_INTERVAL);
        let closed = self.closed.clone();
        let streams = self.streams.clone();
        loop {
            let consumer = self.consumer.clone();
            tokio::select! {
                _ = closed.cancelled() => break,
                _ = streams.closed() => {
                    debug!(topic = %self.topic, "subscription dropped");
                    break;
                }
                Some(partition) = revoked.recv() => self.revoke(partition),
                _ = flush.tick() => self.flush_parked(),
                received = consumer.recv() => match received {
                    Ok(record) => {
                        let message = to_message(&record);
                        self.route(message);
                    }
                    Err(err) => {
                        warn!(
                            topic = %self.topic,
                            error = %err,
                            retry_in_ms = self.reconnect_retry_delay.as_millis() as u64,
                            "kafka consumer error"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(self.reconnect_retry_delay) => {}
                            _ = closed.cancelled() => break,
                            _ = streams.closed() => break,
                        }
                    }
                },
            }
        }
        for (_, route) in self.routes.drain() {
            route.stop.cancel();
        }
        self.consumer.unsubscribe();
        debug!(topic = %self.topic, "kafka pump stopped");
    }

    fn revoke(&mut self, partition: i32) {
        let Some(route) = self.routes.remove(&partition) else {
            return;
        };
        route.stop.cancel();
        if route.paused {
            set_paused(&self.consumer, &self.topic, partition, false);
        }
        info!(
            topic = %self.topic,
            partition,
            dropped = route.parked.len(),
            "partition revoked"
        );
    }

    fn route(&mut self, message: Message) {
        let partition = message.partition;
        if !self.routes.contains_key(&partition) {
            let (tx, rx) = mpsc::channel(PARTITION_BUFFER);
            let stop = self.closed.child_token();
            let stream = KafkaPartitionStream {
                partition,
                topic: self.topic.clone(),
                rx,
                consumer: self.consumer.clone(),
                redelivery: Arc::new(Mutex::new(None)),
                nack_resend_delay: self.nack_resend_delay,
                stop: stop.clone(),
            };
            if self.streams.send(Box::new(stream)).is_err() {
                debug!(topic = %self.topic, partition, "subscription dropped, discarding record");
                return;
            }
            self.routes.insert(
                partition,
                PartitionRoute {
                    tx,
                    parked: VecDeque::new(),
                    paused: false,
                    stop,
                },
            );
        }
        let Some(route) = self.routes.get_mut(&partition) else {
            return;
        };

        if !route.parked.is_empty() {
            route.parked.push_back(message);
            return;
        }
        match route.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                route.parked.push_back(message);
                if !route.paused {
                    route.paused = set_paused(&self.consumer, &self.topic, partition, true);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(topic = %self.topic, partition, "partition worker gone, discarding record");
            }
        }
    }

    fn flush_parked(&mut self) {
        for (partition, route) in &mut self.routes {
            while let Some(message) = route.parked.pop_front() {
                match route.tx.try_send(message) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(message)) => {
                        route.parked.push_front(message);
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        route.parked.clear();
                        break;
                    }
                }
            }
            if route.parked.is_empty() && route.paused {
                route.paused = !set_paused(&self.consumer, &self.topic, *partition, false);
            }
        }
    }
}

/// Pause or resume one partition. Returns whether the call succeeded.
fn set_paused(consumer: &PumpConsumer, topic: &str, partition: i32, pause: bool) -> bool {
    let mut list = TopicPartitionList::new();
    list.add_partition(topic, partition);
    let result = if pause {
        consumer.pause(&list)
    } else {
        consumer.resume(&list)
    };
    match result {
        Ok(()) => {
            debug!(topic, partition, paused = pause, "partition flow control");
            true
        }
        Err(err) => {
            warn!(topic, partition, error = %err, "partition flow control failed");
            false
        }
    }
}

fn to_message<M: KafkaMessage>(record: &M) -> Message {
    let metadata: std::collections::BTreeMap<String, String> = record
        .headers()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|h| {
                    let value = h.value?;
                    Some((h.key.to_string(), String::from_utf8_lossy(value).into_owned()))
                })
                .collect()
        })
        .unwrap_or_default();
    let uuid = metadata
        .get(MESSAGE_UUID_KEY)
        .and_then(|u| Uuid::parse_str(u).ok())
        .unwrap_or_else(Uuid::new_v4);
    Message {
        uuid,
        topic: record.topic().to_string(),
        partition: record.partition(),
        offset: record.offset(),
        key: record.key().map(<[u8]>::to_vec),
        payload: record.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        metadata,
    }
}

// =============================================================================
// PARTITION STREAM
// =============================================================================

type RedeliverySlot = Arc<Mutex<Option<(Message, Instant)>>>;

struct KafkaPartitionStream {
    partition: i32,
    topic: String,
    rx: mpsc::Receiver<Message>,
    consumer: Arc<PumpConsumer>,
    redelivery: RedeliverySlot,
    nack_resend_delay: Duration,
    stop: CancellationToken,
}

impl KafkaPartitionStream {
    fn delivery(&self, message: Message) -> Delivery {
        let acker = KafkaAcker {
            consumer: self.consumer.clone(),
            topic: self.topic.clone(),
            message: message.clone(),
            redelivery: self.redelivery.clone(),
            nack_resend_delay: self.nack_resend_delay,
        };
        Delivery::new(message, Box::new(acker))
    }
}

#[async_trait]
impl PartitionStream for KafkaPartitionStream {
    fn partition(&self) -> i32 {
        self.partition
    }

    async fn recv(&mut self) -> Option<Result<Delivery, TransportError>> {
        let pending = self.redelivery.lock().take();
        if let Some((message, at)) = pending {
            tokio::select! {
                _ = tokio::time::sleep_until(at) => {}
                _ = self.stop.cancelled() => return None,
            }
            return Some(Ok(self.delivery(message)));
        }

        let message = tokio::select! {
            message = self.rx.recv() => message?,
            _ = self.stop.cancelled() => return None,
        };
        Some(Ok(self.delivery(message)))
    }
}

struct KafkaAcker {
    consumer: Arc<PumpConsumer>,
    topic: String,
    message: Message,
    redelivery: RedeliverySlot,
    nack_resend_delay: Duration,
}

impl Acknowledger for KafkaAcker {
    fn ack(&self) -> Result<(), TransportError> {
        let stored =
            self.consumer
                .store_offset(&self.topic, self.message.partition, self.message.offset + 1);
        if !offset_store_outcome(stored)? {
            debug!(
                topic = %self.topic,
                partition = self.message.partition,
                offset = self.message.offset,
                "partition no longer assigned, offset not stored"
            );
        }
        Ok(())
    }

    fn nack(&self) -> Result<(), TransportError> {
        *self.redelivery.lock() = Some((
            self.message.clone(),
            Instant::now() + self.nack_resend_delay,
        ));
        Ok(())
    }
}

/// Whether the offset was stored. A partition revoked since the record
/// was read is not an error.
fn offset_store_outcome(result: KafkaResult<()>) -> Result<bool, TransportError> {
    match result {
        Ok(()) => Ok(true),
        Err(KafkaError::StoreOffset(RDKafkaErrorCode::State)) => Ok(false),
        Err(err) => Err(TransportError::Acknowledge(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> KafkaSettings {
        KafkaSettings {
            brokers: vec!["a:9092".into(), "b:9092".into()],
            version: Some("2.8.0".into()),
            tls: None,
            publish_timeout: Duration::from_secs(5),
            nack_resend_delay: Duration::from_secs(60),
            reconnect_retry_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_producer_config_is_idempotent() {
        let config = settings().producer_config();
        assert_eq!(config.get("bootstrap.servers"), Some("a:9092,b:9092"));
        assert_eq!(config.get("enable.idempotence"), Some("true"));
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("broker.version.fallback"), Some("2.8.0"));
    }

    #[test]
    fn test_consumer_config_follows_options() {
        let config = settings().consumer_config(&SubscribeOptions {
            consumer_group: "billing".into(),
            from_oldest: true,
        });
        assert_eq!(config.get("group.id"), Some("billing"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
    }

    #[test]
    fn test_tls_settings_map_to_ssl() {
        let mut settings = settings();
        settings.tls = Some(TlsSettings {
            ca_cert_pem: "/etc/ca.pem".into(),
            skip_verify: true,
            ..TlsSettings::default()
        });
        let config = settings.client_config();
        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert_eq!(config.get("ssl.ca.location"), Some("/etc/ca.pem"));
        assert_eq!(config.get("ssl.certificate.location"), None);
        assert_eq!(
            config.get("enable.ssl.certificate.verification"),
            Some("false")
        );
    }

    #[test]
    fn test_ack_on_revoked_partition_is_not_an_error() {
        assert!(offset_store_outcome(Ok(())).unwrap());
        let revoked = KafkaError::StoreOffset(RDKafkaErrorCode::State);
        assert!(!offset_store_outcome(Err(revoked)).unwrap());
        let invalid = KafkaError::StoreOffset(RDKafkaErrorCode::InvalidArgument);
        assert!(matches!(
            offset_store_outcome(Err(invalid)),
            Err(TransportError::Acknowledge(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_its_pump() {
        let transport = KafkaTransport::consume_only(KafkaSettings {
            brokers: vec!["127.0.0.1:1".into()],
            version: None,
            ..settings()
        });
        let subscription = transport
            .subscribe(
                "orders",
                &SubscribeOptions {
                    consumer_group: "billing".into(),
                    from_oldest: true,
                },
            )
            .await
            .unwrap();
        drop(subscription);

        let pump = transport.pumps.lock().pop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump kept its consumer after the subscription was dropped")
            .unwrap();
    }
}
