//! # Domain Layer
//!
//! Topics, schema handles, messages, retry policy, lifecycle states,
//! configuration and the error taxonomy.

pub mod config;
pub mod errors;
pub mod helpers;
pub mod lifecycle;
pub mod message;
pub mod retry_policy;
pub mod topic;

pub use config::{BrokerConfig, RetryConfig, TlsSettings, TopicConfig};
pub use errors::{
    BrokerError, CodecError, DecodingError, EncodingError, ErrorKind, HandlerError,
    LifecycleError, RegistryError, SchemaResolutionError, TransportError,
};
pub use helpers::{compact_schema, parse_date};
pub use lifecycle::BrokerState;
pub use message::{Disposition, Message, OutboundMessage, CORRELATION_ID_KEY, MESSAGE_UUID_KEY};
pub use retry_policy::RetryPolicy;
pub use topic::{subject_for, ResolutionOutcome, SchemaHandle, Topic};
