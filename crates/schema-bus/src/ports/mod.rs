//! # Ports
//!
//! Inbound: the broker API and handler capability.
//! Outbound: registry, transport, codec and observer capabilities.

pub mod inbound;
pub mod outbound;

pub use inbound::{handler_fn, FnHandler, HandlerBinding, MessageBrokerApi, MessageHandler};
pub use outbound::{
    Acknowledger, BrokerObserver, Codec, Delivery, NoopObserver, PartitionStream,
    SchemaRegistry, SubscribeOptions, Subscription, Transport,
};
