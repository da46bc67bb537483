//! Handler middleware.
//!
//! Layer order is fixed: Delivery → CorrelationTagging → Retry → Handler.
//! There is no plugin list; [`HandlerChain`] is the only composition.

pub mod correlation;
pub mod retry;

pub use correlation::CorrelationTagging;
pub use retry::{RetryMiddleware, RetryOutcome};

use std::sync::Arc;

use tracing::{info_span, Instrument};

use crate::codec::Envelope;
use crate::ports::inbound::MessageHandler;

/// One bound handler behind its middleware.
pub struct HandlerChain {
    name: String,
    correlation: CorrelationTagging,
    retry: Arc<RetryMiddleware>,
    handler: Arc<dyn MessageHandler>,
}

impl HandlerChain {
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        retry: Arc<RetryMiddleware>,
    ) -> Self {
        Self {
            name: name.into(),
            correlation: CorrelationTagging,
            retry,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one delivery through the chain.
    pub async fn dispatch(&self, envelope: &mut Envelope) -> RetryOutcome {
        let correlation_id = self.correlation.tag(envelope);
        let span = info_span!(
            "handle",
            handler = %self.name,
            topic = %envelope.topic().name(),
            partition = envelope.message().partition,
            offset = envelope.message().offset,
            correlation_id = %correlation_id,
        );
        self.retry
            .run(self.handler.as_ref(), envelope)
            .instrument(span)
            .await
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerChain")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
