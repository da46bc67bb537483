//! # Messages
//!
//! Wire-level message shapes. Payloads are opaque bytes here; decoding goes
//! through the topic's codec.

use std::collections::BTreeMap;

use uuid::Uuid;

/// Metadata key carrying the correlation id.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Metadata key carrying the producer-assigned message uuid.
pub const MESSAGE_UUID_KEY: &str = "message_uuid";

/// A message on its way to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub uuid: Uuid,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

impl OutboundMessage {
    /// New message with a fresh uuid recorded in its metadata.
    pub fn new(payload: Vec<u8>) -> Self {
        let uuid = Uuid::new_v4();
        let mut metadata = BTreeMap::new();
        metadata.insert(MESSAGE_UUID_KEY.to_string(), uuid.to_string());
        Self {
            uuid,
            key: None,
            payload,
            metadata,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A message delivered from a topic partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub uuid: Uuid,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    /// Materialize a published message at a log position.
    pub fn from_outbound(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        outbound: OutboundMessage,
    ) -> Self {
        Self {
            uuid: outbound.uuid,
            topic: topic.into(),
            partition,
            offset,
            key: outbound.key,
            payload: outbound.payload,
            metadata: outbound.metadata,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID_KEY).map(String::as_str)
    }

    pub fn set_correlation_id(&mut self, id: impl Into<String>) {
        self.metadata.insert(CORRELATION_ID_KEY.to_string(), id.into());
    }
}

/// What happened to a delivery once the handler chain finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Handler succeeded.
    Ack,
    /// Retry budget spent; acked because the policy drops poison messages.
    AckExhausted,
    /// Retry budget spent; handed back to the transport for redelivery.
    Nack,
}

impl Disposition {
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack | Self::AckExhausted)
    }

    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::AckExhausted => "ack_exhausted",
            Self::Nack => "nack",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_records_uuid() {
        let msg = OutboundMessage::new(vec![1, 2, 3]).with_key("k");
        assert_eq!(
            msg.metadata.get(MESSAGE_UUID_KEY),
            Some(&msg.uuid.to_string())
        );
        assert_eq!(msg.key.as_deref(), Some(&b"k"[..]));
    }

    #[test]
    fn test_correlation_id_roundtrip_through_metadata() {
        let mut msg = Message::from_outbound("orders", 0, 7, OutboundMessage::new(vec![]));
        assert!(msg.correlation_id().is_none());
        msg.set_correlation_id("abc");
        assert_eq!(msg.correlation_id(), Some("abc"));
        assert_eq!(msg.offset, 7);
    }

    #[test]
    fn test_disposition_labels() {
        assert!(Disposition::Ack.is_ack());
        assert!(Disposition::AckExhausted.is_ack());
        assert!(!Disposition::Nack.is_ack());
        assert_eq!(Disposition::AckExhausted.as_str(), "ack_exhausted");
    }
}
