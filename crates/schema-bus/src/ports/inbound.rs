//! # Inbound Ports
//!
//! What the broker offers its callers, and the handler capability callers
//! bind to topics.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::codec::Envelope;
use crate::domain::{BrokerError, BrokerState, HandlerError, SchemaHandle, Topic};

/// Domain logic for one topic. Must be idempotent: delivery is
/// at-least-once.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` as a handler. The closure receives its own copy of the envelope
/// on every attempt.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        (self.f)(envelope.clone()).await
    }
}

/// A named handler bound to a topic.
#[derive(Clone)]
pub struct HandlerBinding {
    pub name: String,
    pub topic: Arc<Topic>,
    pub handler: Arc<dyn MessageHandler>,
}

impl HandlerBinding {
    pub fn new(
        name: impl Into<String>,
        topic: Arc<Topic>,
        handler: impl MessageHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            topic,
            handler: Arc::new(handler),
        }
    }
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("name", &self.name)
            .field("topic", &self.topic.name())
            .finish_non_exhaustive()
    }
}

/// Message broker API - inbound port.
#[async_trait]
pub trait MessageBrokerApi: Send + Sync {
    /// Resolve (if needed), encode and send a payload.
    async fn publish_value(
        &self,
        topic: &Topic,
        key: Option<Vec<u8>>,
        payload: &serde_json::Value,
    ) -> Result<(), BrokerError>;

    /// Resolve the schema of `topic` against the registry.
    async fn set_schema(&self, topic: &Topic) -> Result<SchemaHandle, BrokerError>;

    /// Dispatch deliveries to `handlers`. Blocks until `cancel` fires,
    /// `stop` is called, or the transport fails fatally.
    async fn listen(
        &self,
        handlers: Vec<HandlerBinding>,
        cancel: CancellationToken,
    ) -> Result<(), BrokerError>;

    /// Tear the listener down. Idempotent.
    async fn stop(&self) -> Result<(), BrokerError>;

    fn state(&self) -> BrokerState;

    fn is_enabled(&self) -> bool;
}
