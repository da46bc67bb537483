//! JSON codec. Ignores the schema; useful for tests and schema-less topics.

use crate::domain::{CodecError, SchemaHandle};
use crate::ports::outbound::Codec;

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(
        &self,
        _schema: &SchemaHandle,
        payload: &serde_json::Value,
    ) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(payload).map_err(|e| CodecError::ShapeMismatch(e.to_string()))
    }

    fn decode(&self, _schema: &SchemaHandle, bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}
