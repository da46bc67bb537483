//! # Domain Errors
//!
//! Error taxonomy for the broker client.
//!
//! | Kind | Raised by |
//! |------|-----------|
//! | Configuration | any I/O on a disabled broker, invalid config |
//! | Capability | publish on a consume-only broker |
//! | SchemaResolution | registry RPC failures during negotiation |
//! | Encoding / Decoding | payload does not fit the resolved schema |
//! | Transport | publish path, returned unmodified |
//! | Lifecycle | listen/stop transport failures, invalid transitions |

use thiserror::Error;

use super::lifecycle::BrokerState;

/// Coarse classification of a [`BrokerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Capability,
    SchemaResolution,
    Encoding,
    Decoding,
    Transport,
    Lifecycle,
}

/// Top-level error returned by the broker facade.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// I/O was requested on a broker whose config has `enabled = false`.
    #[error("message broker is not enabled")]
    NotEnabled,

    /// Publish was requested on a broker built without a send capability.
    #[error("message broker was set as consume only")]
    PublishNotPermitted,

    /// Configuration failed validation or could not be loaded.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A date helper received missing or malformed input.
    #[error("unable to parse date")]
    ParseDate,

    #[error(transparent)]
    SchemaResolution(#[from] SchemaResolutionError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Decoding(#[from] DecodingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl BrokerError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotEnabled | Self::InvalidConfig(_) | Self::ParseDate => {
                ErrorKind::Configuration
            }
            Self::PublishNotPermitted => ErrorKind::Capability,
            Self::SchemaResolution(_) => ErrorKind::SchemaResolution,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Decoding(_) => ErrorKind::Decoding,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Lifecycle(_) => ErrorKind::Lifecycle,
        }
    }
}

impl From<config::ConfigError> for BrokerError {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Failure talking to the schema registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("registry connection failed: {0}")]
    Connection(String),

    #[error("registry rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("registry response could not be parsed: {0}")]
    Parse(String),
}

/// Negotiation for a subject failed. The registry error is kept intact.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("schema resolution failed for subject '{subject}': {source}")]
pub struct SchemaResolutionError {
    pub subject: String,
    #[source]
    pub source: RegistryError,
}

// =============================================================================
// CODEC
// =============================================================================

/// Raw codec failure, independent of topic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid schema definition: {0}")]
    InvalidSchema(String),

    #[error("payload does not match schema: {0}")]
    ShapeMismatch(String),

    #[error("malformed data: {0}")]
    Malformed(String),
}

/// Encoding a payload for a topic failed.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("topic '{topic}' has no resolved schema")]
    SchemaNotResolved { topic: String },

    #[error("payload for topic '{topic}' could not be serialized: {source}")]
    Serialize {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding for topic '{topic}' failed: {source}")]
    Codec {
        topic: String,
        #[source]
        source: CodecError,
    },
}

/// Decoding an inbound payload failed.
#[derive(Debug, Error)]
pub enum DecodingError {
    #[error("avro schema not provided for topic '{topic}'")]
    SchemaNotResolved { topic: String },

    #[error("decoding for topic '{topic}' failed: {source}")]
    Codec {
        topic: String,
        #[source]
        source: CodecError,
    },

    #[error("decoded payload for topic '{topic}' does not fit the target type: {source}")]
    Target {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// TRANSPORT AND LIFECYCLE
// =============================================================================

/// Failure reported by a transport implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport connection failed: {0}")]
    Connection(String),

    #[error("publish to topic '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to topic '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("acknowledgement failed: {0}")]
    Acknowledge(String),

    #[error("transport is closed")]
    Closed,
}

/// Run/stop lifecycle failure.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition: {from:?} -> {to:?}")]
    InvalidTransition { from: BrokerState, to: BrokerState },

    #[error("subscription for topic '{topic}' could not be opened: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: TransportError,
    },

    #[error("fatal transport error while listening: {0}")]
    Fatal(#[source] TransportError),

    #[error("transport close failed: {0}")]
    Close(#[source] TransportError),

    #[error("transport close timed out after {0:?}")]
    CloseTimeout(std::time::Duration),
}

/// Failure returned by a domain message handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Create a handler error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<DecodingError> for HandlerError {
    fn from(err: DecodingError) -> Self {
        Self::from_error(err)
    }
}

impl From<BrokerError> for HandlerError {
    fn from(err: BrokerError) -> Self {
        Self::from_error(err)
    }
}
