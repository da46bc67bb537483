//! # Payload Codec
//!
//! Binds a [`Codec`] capability to topics. Decoding tolerates producers that
//! prepend a schema-id header (one magic byte plus a 4-byte id by default):
//! the bytes are tried as-is first, then again with the header stripped.
//! When both attempts fail the second error wins.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::domain::config::DEFAULT_SCHEMA_ID_PREFIX_LEN;
use crate::domain::{CodecError, DecodingError, EncodingError, Message, SchemaHandle, Topic};
use crate::ports::outbound::Codec;

/// Decode `bytes`, retrying without a `prefix_len`-byte header on failure.
/// `prefix_len == 0` disables the retry.
pub fn decode_with_fallback(
    codec: &dyn Codec,
    schema: &SchemaHandle,
    bytes: &[u8],
    prefix_len: usize,
) -> Result<serde_json::Value, CodecError> {
    let first = match codec.decode(schema, bytes) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    if prefix_len == 0 {
        return Err(first);
    }

    trace!(error = %first, prefix_len, "raw decode failed, retrying without schema-id prefix");
    match bytes.get(prefix_len..) {
        Some(rest) => codec.decode(schema, rest),
        None => Err(CodecError::Malformed(format!(
            "payload of {} bytes is shorter than the {prefix_len}-byte prefix",
            bytes.len()
        ))),
    }
}

/// Codec plus the decode fallback offset, shared by every worker.
#[derive(Clone)]
pub struct PayloadCodec {
    codec: Arc<dyn Codec>,
    prefix_len: usize,
}

impl PayloadCodec {
    pub fn new(codec: Arc<dyn Codec>, prefix_len: usize) -> Self {
        Self { codec, prefix_len }
    }

    /// Codec with the default 5-byte fallback.
    pub fn with_default_prefix(codec: Arc<dyn Codec>) -> Self {
        Self::new(codec, DEFAULT_SCHEMA_ID_PREFIX_LEN)
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Encode a JSON value for `topic`. The topic must be resolved.
    pub fn encode_value(
        &self,
        topic: &Topic,
        payload: &serde_json::Value,
    ) -> Result<Vec<u8>, EncodingError> {
        let schema = topic
            .schema()
            .ok_or_else(|| EncodingError::SchemaNotResolved {
                topic: topic.name().to_string(),
            })?;
        self.codec
            .encode(schema, payload)
            .map_err(|source| EncodingError::Codec {
                topic: topic.name().to_string(),
                source,
            })
    }

    /// Encode any serializable payload for `topic`.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        topic: &Topic,
        payload: &T,
    ) -> Result<Vec<u8>, EncodingError> {
        let value = serde_json::to_value(payload).map_err(|source| EncodingError::Serialize {
            topic: topic.name().to_string(),
            source,
        })?;
        self.encode_value(topic, &value)
    }

    pub fn decode_value(
        &self,
        topic: &Topic,
        bytes: &[u8],
    ) -> Result<serde_json::Value, DecodingError> {
        let schema = topic
            .schema()
            .ok_or_else(|| DecodingError::SchemaNotResolved {
                topic: topic.name().to_string(),
            })?;
        decode_with_fallback(self.codec.as_ref(), schema, bytes, self.prefix_len).map_err(
            |source| DecodingError::Codec {
                topic: topic.name().to_string(),
                source,
            },
        )
    }

    pub fn decode<T: DeserializeOwned>(
        &self,
        topic: &Topic,
        bytes: &[u8],
    ) -> Result<T, DecodingError> {
        let value = self.decode_value(topic, bytes)?;
        serde_json::from_value(value).map_err(|source| DecodingError::Target {
            topic: topic.name().to_string(),
            source,
        })
    }
}

impl std::fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCodec")
            .field("prefix_len", &self.prefix_len)
            .finish_non_exhaustive()
    }
}

/// A delivered message together with what a handler needs to decode it.
#[derive(Clone, Debug)]
pub struct Envelope {
    message: Message,
    topic: Arc<Topic>,
    codec: PayloadCodec,
}

impl Envelope {
    pub fn new(message: Message, topic: Arc<Topic>, codec: PayloadCodec) -> Self {
        Self {
            message,
            topic,
            codec,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub(crate) fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.message.correlation_id()
    }

    /// Decode the payload into a domain type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DecodingError> {
        self.codec.decode(&self.topic, &self.message.payload)
    }

    pub fn decode_value(&self) -> Result<serde_json::Value, DecodingError> {
        self.codec.decode_value(&self.topic, &self.message.payload)
    }
}
