//! # Adapters
//!
//! Concrete registries, transports, codecs and observers behind the
//! outbound ports.
//!
//! | Adapter | Port | Notes |
//! |---------|------|-------|
//! | [`InMemorySchemaRegistry`] | `SchemaRegistry` | subjects and versions in process |
//! | [`HttpSchemaRegistry`] | `SchemaRegistry` | Confluent-compatible REST API |
//! | [`InMemoryTransport`] | `Transport` | partitioned log in process |
//! | `KafkaTransport` | `Transport` | rdkafka, behind the `kafka` feature |
//! | [`AvroCodec`] | `Codec` | Avro binary datums |
//! | [`JsonCodec`] | `Codec` | JSON bytes, schema ignored |
//! | [`TracingObserver`] | `BrokerObserver` | structured log lines |

pub mod avro_codec;
pub mod http_registry;
pub mod json_codec;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory_registry;
pub mod memory_transport;
pub mod observer;

pub use avro_codec::AvroCodec;
pub use http_registry::HttpSchemaRegistry;
pub use json_codec::JsonCodec;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaSettings, KafkaTransport};
pub use memory_registry::InMemorySchemaRegistry;
pub use memory_transport::{InMemoryTransport, TopicStats};
pub use observer::{FanoutObserver, TracingObserver};
