//! # Adapter Wiring
//!
//! Picks concrete adapters for the loaded configuration:
//!
//! | Capability | Configured | Fallback |
//! |------------|------------|----------|
//! | Registry   | `HttpSchemaRegistry` when `schema_registry` is set | `InMemorySchemaRegistry` |
//! | Transport  | `KafkaTransport` with the `kafka` feature | `InMemoryTransport` |
//! | Codec      | `AvroCodec` | |

use std::sync::Arc;

use schema_bus::adapters::{AvroCodec, HttpSchemaRegistry, InMemorySchemaRegistry};
use schema_bus::{
    BrokerConfig, BrokerObserver, HandlerBinding, MessageBroker, SchemaRegistry, Transport,
};
use tracing::info;

use crate::handlers::LoggingHandler;

/// Partitions per topic for the in-memory transport.
pub const IN_MEMORY_PARTITIONS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum WiringError {
    #[error(transparent)]
    Broker(#[from] schema_bus::BrokerError),

    #[error(transparent)]
    Transport(#[from] schema_bus::TransportError),
}

/// A configured broker plus one handler binding per configured topic.
pub struct Wired {
    pub broker: MessageBroker,
    pub bindings: Vec<HandlerBinding>,
}

pub fn build_registry(config: &BrokerConfig) -> Result<Arc<dyn SchemaRegistry>, WiringError> {
    match &config.schema_registry {
        Some(url) => {
            let registry = HttpSchemaRegistry::builder()
                .endpoint(url.clone())
                .tls(config.tls.clone())
                .build()?;
            info!(endpoint = %registry.endpoint(), "using HTTP schema registry");
            Ok(Arc::new(registry))
        }
        None => {
            info!("no schema registry configured, using in-memory registry");
            Ok(Arc::new(InMemorySchemaRegistry::new()))
        }
    }
}

#[cfg(feature = "kafka")]
pub fn build_transport(config: &BrokerConfig) -> Result<Arc<dyn Transport>, WiringError> {
    use schema_bus::adapters::{KafkaSettings, KafkaTransport};

    let settings = KafkaSettings::from_config(config);
    let transport = if config.consume_only {
        KafkaTransport::consume_only(settings)
    } else {
        KafkaTransport::new(settings)?
    };
    info!(brokers = ?config.brokers, "using Kafka transport");
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "kafka"))]
pub fn build_transport(config: &BrokerConfig) -> Result<Arc<dyn Transport>, WiringError> {
    use schema_bus::adapters::InMemoryTransport;

    info!(
        partitions = IN_MEMORY_PARTITIONS,
        "built without the kafka feature, using in-memory transport"
    );
    Ok(Arc::new(
        InMemoryTransport::new(IN_MEMORY_PARTITIONS)
            .with_nack_resend_delay(config.nack_resend_delay()),
    ))
}

/// Build the broker and bind [`LoggingHandler`] to every configured topic.
pub fn wire(config: &BrokerConfig, observer: Arc<dyn BrokerObserver>) -> Result<Wired, WiringError> {
    if !config.enabled {
        return Ok(Wired {
            broker: MessageBroker::builder()
                .enabled(false)
                .observer(observer)
                .build()?,
            bindings: Vec::new(),
        });
    }

    let broker = MessageBroker::builder()
        .config(config)
        .transport(build_transport(config)?)
        .registry(build_registry(config)?)
        .codec(Arc::new(AvroCodec::new()))
        .observer(observer)
        .build()?;

    let bindings = config
        .build_topics()?
        .into_iter()
        .map(|topic| {
            let name = format!("log-{}", topic.name());
            HandlerBinding::new(name, Arc::new(topic), LoggingHandler)
        })
        .collect();

    Ok(Wired { broker, bindings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_bus::{BrokerState, MessageBrokerApi, NoopObserver, TopicConfig};

    fn observer() -> Arc<dyn BrokerObserver> {
        Arc::new(NoopObserver)
    }

    #[test]
    fn test_disabled_config_wires_disabled_broker() {
        let wired = wire(&BrokerConfig::default(), observer()).unwrap();
        assert!(!wired.broker.is_enabled());
        assert_eq!(wired.broker.state(), BrokerState::Uninitialized);
        assert!(wired.bindings.is_empty());
    }

    #[test]
    fn test_one_binding_per_topic() {
        let mut config = BrokerConfig::enabled("billing");
        for name in ["orders", "payments"] {
            config.topics.insert(
                name.to_string(),
                TopicConfig {
                    version: 1,
                    raw_schema: Some("\"string\"".to_string()),
                    ..TopicConfig::default()
                },
            );
        }

        let wired = wire(&config, observer()).unwrap();
        assert!(wired.broker.is_enabled());
        assert_eq!(wired.broker.state(), BrokerState::Configured);
        let names: Vec<_> = wired.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["log-orders", "log-payments"]);
    }

    #[test]
    fn test_bad_registry_url_is_rejected() {
        let mut config = BrokerConfig::enabled("billing");
        config.schema_registry = Some("not a url".to_string());
        assert!(matches!(
            wire(&config, observer()),
            Err(WiringError::Broker(_))
        ));
    }
}
