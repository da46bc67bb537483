//! # Message Broker Service
//!
//! Facade over resolver, codec and router implementing [`MessageBrokerApi`].
//!
//! A broker is built in one of three shapes:
//!
//! - disabled: every operation returns `NotEnabled`, no capability is held;
//! - consume-only: no sender, `publish` returns `PublishNotPermitted`;
//! - full: publishes and listens through the same transport.
//!
//! Both rejections happen before any registry or transport call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adapters::{AvroCodec, TracingObserver};
use crate::algorithms::SchemaResolver;
use crate::codec::PayloadCodec;
use crate::domain::config::DEFAULT_SCHEMA_ID_PREFIX_LEN;
use crate::domain::{
    BrokerConfig, BrokerError, BrokerState, OutboundMessage, RetryPolicy, SchemaHandle, Topic,
};
use crate::middleware::RetryMiddleware;
use crate::ports::inbound::{HandlerBinding, MessageBrokerApi};
use crate::ports::outbound::{BrokerObserver, Codec, SchemaRegistry, SubscribeOptions, Transport};
use crate::router::{Router, RouterConfig};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Capabilities of an enabled broker.
struct Active {
    sender: Option<Arc<dyn Transport>>,
    resolver: SchemaResolver,
    codec: PayloadCodec,
    router: Router,
}

/// Schema-governed publish/subscribe client.
pub struct MessageBroker {
    active: Option<Active>,
    observer: Arc<dyn BrokerObserver>,
}

impl MessageBroker {
    pub fn builder() -> MessageBrokerBuilder {
        MessageBrokerBuilder::default()
    }

    /// A broker that refuses every operation and never touches the network.
    pub fn disabled() -> Self {
        Self {
            active: None,
            observer: Arc::new(TracingObserver),
        }
    }

    fn active(&self) -> Result<&Active, BrokerError> {
        self.active.as_ref().ok_or(BrokerError::NotEnabled)
    }

    pub fn is_consume_only(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.sender.is_none())
    }

    /// Publish a serializable payload without a key.
    pub async fn publish<T>(&self, topic: &Topic, payload: &T) -> Result<(), BrokerError>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.send(topic, None, payload).await
    }

    /// Publish with a partitioning key.
    pub async fn publish_with_key<T>(
        &self,
        topic: &Topic,
        key: impl Into<Vec<u8>>,
        payload: &T,
    ) -> Result<(), BrokerError>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.send(topic, Some(key.into()), payload).await
    }

    async fn send<T>(
        &self,
        topic: &Topic,
        key: Option<Vec<u8>>,
        payload: &T,
    ) -> Result<(), BrokerError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let active = self.active()?;
        let sender = active
            .sender
            .as_ref()
            .ok_or(BrokerError::PublishNotPermitted)?;

        let result = async {
            active.resolver.resolve(topic).await?;
            let bytes = active.codec.encode(topic, payload)?;
            let mut message = OutboundMessage::new(bytes);
            message.key = key;
            sender.publish(topic.name(), message).await?;
            Ok::<(), BrokerError>(())
        }
        .await;

        match &result {
            Ok(()) => {
                debug!(topic = topic.name(), "published");
                self.observer.published(topic.name());
            }
            Err(err) => self.observer.publish_failed(topic.name(), err),
        }
        result
    }
}

impl std::fmt::Debug for MessageBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBroker")
            .field("enabled", &self.active.is_some())
            .field("consume_only", &self.is_consume_only())
            .field("state", &MessageBrokerApi::state(self))
            .finish()
    }
}

#[async_trait]
impl MessageBrokerApi for MessageBroker {
    async fn publish_value(
        &self,
        topic: &Topic,
        key: Option<Vec<u8>>,
        payload: &serde_json::Value,
    ) -> Result<(), BrokerError> {
        self.send(topic, key, payload).await
    }

    async fn set_schema(&self, topic: &Topic) -> Result<SchemaHandle, BrokerError> {
        let active = self.active()?;
        Ok(active.resolver.resolve(topic).await?)
    }

    async fn listen(
        &self,
        handlers: Vec<HandlerBinding>,
        cancel: CancellationToken,
    ) -> Result<(), BrokerError> {
        let active = self.active()?;
        info!(handlers = handlers.len(), "starting listener");
        active.router.run(handlers, cancel).await
    }

    async fn stop(&self) -> Result<(), BrokerError> {
        match &self.active {
            Some(active) => active.router.stop().await,
            None => Ok(()),
        }
    }

    fn state(&self) -> BrokerState {
        self.active
            .as_ref()
            .map_or(BrokerState::Uninitialized, |a| a.router.state())
    }

    fn is_enabled(&self) -> bool {
        self.active.is_some()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

pub struct MessageBrokerBuilder {
    enabled: bool,
    consume_only: bool,
    transport: Option<Arc<dyn Transport>>,
    registry: Option<Arc<dyn SchemaRegistry>>,
    codec: Option<Arc<dyn Codec>>,
    observer: Option<Arc<dyn BrokerObserver>>,
    retry_policy: RetryPolicy,
    subscribe: SubscribeOptions,
    shutdown_timeout: Duration,
    prefix_len: usize,
}

impl Default for MessageBrokerBuilder {
    fn default() -> Self {
        Self {
            enabled: true,
            consume_only: false,
            transport: None,
            registry: None,
            codec: None,
            observer: None,
            retry_policy: RetryPolicy::default(),
            subscribe: SubscribeOptions {
                consumer_group: String::new(),
                from_oldest: true,
            },
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            prefix_len: DEFAULT_SCHEMA_ID_PREFIX_LEN,
        }
    }
}

impl MessageBrokerBuilder {
    /// Take every setting from a validated config section.
    pub fn config(mut self, config: &BrokerConfig) -> Self {
        self.enabled = config.enabled;
        self.consume_only = config.consume_only;
        self.retry_policy = config.retry_policy();
        self.subscribe = SubscribeOptions {
            consumer_group: config.consumer_group_id.clone(),
            from_oldest: config.from_oldest,
        };
        self.shutdown_timeout = config.shutdown_timeout();
        self.prefix_len = config.schema_id_prefix_len;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn consume_only(mut self, consume_only: bool) -> Self {
        self.consume_only = consume_only;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Payload codec. Defaults to [`AvroCodec`].
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Event sink. Defaults to [`TracingObserver`].
    pub fn observer(mut self, observer: Arc<dyn BrokerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.subscribe.consumer_group = group.into();
        self
    }

    pub fn from_oldest(mut self, from_oldest: bool) -> Self {
        self.subscribe.from_oldest = from_oldest;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bytes skipped by the decode fallback; `0` disables it.
    pub fn schema_id_prefix_len(mut self, len: usize) -> Self {
        self.prefix_len = len;
        self
    }

    pub fn build(self) -> Result<MessageBroker, BrokerError> {
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(TracingObserver) as Arc<dyn BrokerObserver>);
        if !self.enabled {
            info!("message broker disabled");
            return Ok(MessageBroker {
                active: None,
                observer,
            });
        }

        let transport = self
            .transport
            .ok_or_else(|| BrokerError::InvalidConfig("enabled broker needs a transport".into()))?;
        let registry = self.registry.ok_or_else(|| {
            BrokerError::InvalidConfig("enabled broker needs a schema registry".into())
        })?;
        self.retry_policy.validate()?;

        let codec = PayloadCodec::new(
            self.codec
                .unwrap_or_else(|| Arc::new(AvroCodec::new()) as Arc<dyn Codec>),
            self.prefix_len,
        );
        let resolver = SchemaResolver::new(registry, observer.clone());
        let retry = Arc::new(RetryMiddleware::new(self.retry_policy, observer.clone()));
        let router = Router::new(
            transport.clone(),
            resolver.clone(),
            codec.clone(),
            retry,
            observer.clone(),
            RouterConfig {
                subscribe: self.subscribe,
                shutdown_timeout: self.shutdown_timeout,
            },
        );
        let sender = (!self.consume_only).then_some(transport);
        info!(consume_only = self.consume_only, "message broker configured");

        Ok(MessageBroker {
            active: Some(Active {
                sender,
                resolver,
                codec,
                router,
            }),
            observer,
        })
    }
}
