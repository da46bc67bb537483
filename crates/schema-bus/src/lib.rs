//! # Schema-Bus
//!
//! Schema-governed publish/subscribe over a log-based broker.
//!
//! ## Purpose
//!
//! Every topic carries a schema negotiated with a registry before the first
//! byte is sent or decoded. Handlers are bound per topic and run behind
//! correlation tagging and bounded retry, one sequential worker per
//! partition.
//!
//! ## Lifecycle
//!
//! ```text
//! [Uninitialized] ──build──→ [Configured] ──listen──→ [Running] ──stop/cancel──→ [Stopped]
//!                                  ↑                       │
//!                                  └──── startup failure ──┘
//! ```
//!
//! | Operation | Disabled | Consume-only | Enabled |
//! |-----------|----------|--------------|---------|
//! | `publish` | `NotEnabled` | `PublishNotPermitted` | resolve, encode, send |
//! | `set_schema` | `NotEnabled` | resolve | resolve |
//! | `listen` | `NotEnabled` | blocks until stopped | blocks until stopped |
//! | `stop` | no-op | idempotent | idempotent |
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  adapters/   - registries, transports, codecs, observers       │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ports/inbound.rs  - MessageBrokerApi, MessageHandler          │
//! │  ports/outbound.rs - SchemaRegistry, Transport, Codec, Observer│
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  domain/      - topics, messages, policies, config, errors     │
//! │  algorithms/  - schema negotiation, backoff                    │
//! │  codec.rs     - decode fallback, envelopes                     │
//! │  middleware/  - correlation tagging, retry                     │
//! │  router.rs    - workers and run/stop lifecycle                 │
//! │  service.rs   - MessageBroker facade                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use schema_bus::adapters::{InMemorySchemaRegistry, InMemoryTransport};
//! use schema_bus::{handler_fn, Envelope, HandlerBinding, MessageBroker, MessageBrokerApi, Topic};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), schema_bus::BrokerError> {
//! let broker = MessageBroker::builder()
//!     .transport(Arc::new(InMemoryTransport::new(3)))
//!     .registry(Arc::new(InMemorySchemaRegistry::new()))
//!     .consumer_group("billing")
//!     .build()?;
//!
//! let orders = Arc::new(
//!     Topic::new("orders")
//!         .with_schema(1, r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"string"}]}"#)
//!         .register_schema(true),
//! );
//! broker.publish(&orders, &serde_json::json!({"id": "o-1"})).await?;
//!
//! let binding = HandlerBinding::new(
//!     "orders-handler",
//!     orders.clone(),
//!     handler_fn(|envelope: Envelope| async move {
//!         let order = envelope.decode_value()?;
//!         tracing::info!(%order, "received");
//!         Ok::<(), schema_bus::HandlerError>(())
//!     }),
//! );
//! broker.listen(vec![binding], CancellationToken::new()).await
//! # }
//! ```

pub mod adapters;
pub mod algorithms;
pub mod codec;
pub mod domain;
pub mod middleware;
pub mod ports;
pub mod router;
pub mod service;

pub use algorithms::SchemaResolver;
pub use codec::{decode_with_fallback, Envelope, PayloadCodec};
pub use domain::{
    compact_schema, parse_date, subject_for, BrokerConfig, BrokerError, BrokerState, CodecError,
    DecodingError, Disposition, EncodingError, ErrorKind, HandlerError, LifecycleError, Message,
    OutboundMessage, RegistryError, ResolutionOutcome, RetryPolicy, SchemaHandle,
    SchemaResolutionError, Topic, TopicConfig, TransportError,
};
pub use middleware::{HandlerChain, RetryMiddleware, RetryOutcome};
pub use ports::{
    handler_fn, BrokerObserver, Codec, HandlerBinding, MessageBrokerApi, MessageHandler,
    NoopObserver, SchemaRegistry, SubscribeOptions, Transport,
};
pub use router::{Router, RouterConfig};
pub use service::{MessageBroker, MessageBrokerBuilder};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
