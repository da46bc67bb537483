//! Handlers bound by the runtime to configured topics.

use async_trait::async_trait;
use bus_telemetry::log_topic_event;
use schema_bus::{Envelope, HandlerError, MessageHandler};

const COMPONENT: &str = "runtime";

/// Decodes each message and logs it. Undecodable payloads fail the
/// delivery so the retry policy decides their fate.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let value = envelope.decode_value()?;
        let message = envelope.message();
        log_topic_event!(
            info,
            COMPONENT,
            "message received",
            message.topic,
            partition = message.partition,
            offset = message.offset,
            correlation_id = envelope.correlation_id().unwrap_or("-"),
            payload = %value
        );
        Ok(())
    }
}
