//! Correlation-id tagging.
//!
//! Keeps an upstream correlation id when the message carries one, otherwise
//! assigns a fresh uuid so every log line of a delivery can be joined.

use uuid::Uuid;

use crate::codec::Envelope;

#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationTagging;

impl CorrelationTagging {
    /// Ensure the envelope carries a correlation id and return it.
    pub fn tag(&self, envelope: &mut Envelope) -> String {
        if let Some(existing) = envelope.correlation_id().filter(|id| !id.is_empty()) {
            return existing.to_string();
        }
        let id = Uuid::new_v4().to_string();
        envelope.message_mut().set_correlation_id(id.clone());
        id
    }
}
