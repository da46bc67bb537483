//! # Schema Resolution
//!
//! Negotiates the wire schema of a topic against the registry.
//!
//! ## Algorithm
//!
//! - Topics that do not register take the latest schema of the subject.
//! - Registering topics:
//!   1. adopt the exact text if it is already registered;
//!   2. otherwise register it when the registry is unreachable for the
//!      subject, empty, or behind the desired version;
//!   3. otherwise adopt the latest handle as-is.
//!
//! The result is stored once per topic. Registry errors are returned
//! unchanged inside [`SchemaResolutionError`]; nothing here retries.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{RegistryError, ResolutionOutcome, SchemaHandle, SchemaResolutionError, Topic};
use crate::ports::outbound::{BrokerObserver, SchemaRegistry};

/// Registry-backed resolver shared by the publish and consume paths.
#[derive(Clone)]
pub struct SchemaResolver {
    registry: Arc<dyn SchemaRegistry>,
    observer: Arc<dyn BrokerObserver>,
}

impl SchemaResolver {
    pub fn new(registry: Arc<dyn SchemaRegistry>, observer: Arc<dyn BrokerObserver>) -> Self {
        Self { registry, observer }
    }

    /// Resolve `topic` unless it already carries a handle.
    pub async fn resolve(&self, topic: &Topic) -> Result<SchemaHandle, SchemaResolutionError> {
        if let Some(handle) = topic.schema() {
            return Ok(handle.clone());
        }

        let subject = topic.subject();
        let subject_ref = subject.as_str();
        let handle = topic
            .get_or_try_resolve(|| async move {
                match self.negotiate(topic, subject_ref).await {
                    Ok((handle, outcome)) => {
                        info!(
                            subject = subject_ref,
                            schema_id = handle.id(),
                            version = ?handle.version(),
                            outcome = outcome.as_str(),
                            "schema resolved"
                        );
                        self.observer.schema_resolved(subject_ref, &handle, outcome);
                        Ok(handle)
                    }
                    Err(source) => {
                        let err = SchemaResolutionError {
                            subject: subject_ref.to_string(),
                            source,
                        };
                        self.observer.schema_resolution_failed(&err);
                        Err(err)
                    }
                }
            })
            .await?;
        Ok(handle.clone())
    }

    async fn negotiate(
        &self,
        topic: &Topic,
        subject: &str,
    ) -> Result<(SchemaHandle, ResolutionOutcome), RegistryError> {
        if !topic.registers_schema() {
            let latest = self.registry.latest(subject).await?;
            return Ok((latest, ResolutionOutcome::AdoptedLatest));
        }

        match self
            .registry
            .check_registered(subject, topic.raw_schema())
            .await
        {
            Ok(Some(handle)) => return Ok((handle, ResolutionOutcome::AdoptedRegistered)),
            Ok(None) => {}
            Err(err) => {
                debug!(subject, error = %err, "registration check failed, treating schema as unregistered");
            }
        }

        match self.registry.latest(subject).await {
            Ok(latest) if latest.version().is_some_and(|v| v >= topic.version()) => {
                debug!(
                    subject,
                    latest = ?latest.version(),
                    desired = topic.version(),
                    "registry already at or past desired version"
                );
                Ok((latest, ResolutionOutcome::AdoptedLatest))
            }
            Ok(latest) => {
                debug!(
                    subject,
                    latest = ?latest.version(),
                    desired = topic.version(),
                    "registry behind desired version, registering"
                );
                self.create(topic, subject).await
            }
            Err(err) => {
                debug!(subject, error = %err, "no latest schema, registering");
                self.create(topic, subject).await
            }
        }
    }

    async fn create(
        &self,
        topic: &Topic,
        subject: &str,
    ) -> Result<(SchemaHandle, ResolutionOutcome), RegistryError> {
        let created = self.registry.create(subject, topic.raw_schema()).await?;
        Ok((created, ResolutionOutcome::Created))
    }
}

impl std::fmt::Debug for SchemaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::outbound::{MockSchemaRegistry, NoopObserver, RegistryCalls};

    const ORDERS_V2: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"long"},{"name":"note","type":"string"}]}"#;
    const ORDERS_V1: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"long"}]}"#;

    fn resolver(registry: Arc<MockSchemaRegistry>) -> SchemaResolver {
        SchemaResolver::new(registry, Arc::new(NoopObserver))
    }

    fn producer_topic() -> Topic {
        Topic::new("orders")
            .with_schema(2, ORDERS_V2)
            .register_schema(true)
    }

    #[tokio::test]
    async fn test_consumer_topic_never_creates() {
        let mut registry = MockSchemaRegistry::new();
        registry.latest = Some(SchemaHandle::new(3, ORDERS_V1).with_version(1));
        let registry = Arc::new(registry);

        let topic = Topic::new("orders").with_schema(5, ORDERS_V2);
        let handle = resolver(registry.clone()).resolve(&topic).await.unwrap();

        assert_eq!(handle.id(), 3);
        assert_eq!(registry.calls().create, 0);
        assert_eq!(registry.calls().check, 0);
    }

    #[tokio::test]
    async fn test_consumer_topic_propagates_fetch_failure() {
        let registry = Arc::new(MockSchemaRegistry::new());
        let topic = Topic::new("orders");

        let err = resolver(registry.clone()).resolve(&topic).await.unwrap_err();
        assert_eq!(err.subject, "orders-value");
        assert!(matches!(err.source, RegistryError::SubjectNotFound(_)));
        assert_eq!(registry.calls().create, 0);
        assert!(!topic.is_resolved());
    }

    #[tokio::test]
    async fn test_registered_schema_is_adopted_and_idempotent() {
        let mut registry = MockSchemaRegistry::new();
        registry.registered = Some(SchemaHandle::new(11, ORDERS_V2).with_version(2));
        let registry = Arc::new(registry);
        let resolver = resolver(registry.clone());
        let topic = producer_topic();

        let first = resolver.resolve(&topic).await.unwrap();
        let second = resolver.resolve(&topic).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.id(), 11);
        assert_eq!(
            registry.calls(),
            RegistryCalls {
                check: 1,
                latest: 0,
                create: 0
            }
        );
    }

    #[tokio::test]
    async fn test_latest_at_or_past_desired_is_adopted() {
        for latest_version in [2, 3] {
            let mut registry = MockSchemaRegistry::new();
            registry.latest = Some(SchemaHandle::new(20, ORDERS_V2).with_version(latest_version));
            let registry = Arc::new(registry);

            let topic = producer_topic();
            let handle = resolver(registry.clone()).resolve(&topic).await.unwrap();

            assert_eq!(handle.id(), 20);
            assert_eq!(registry.calls().create, 0);
        }
    }

    #[tokio::test]
    async fn test_lagging_registry_triggers_create() {
        let mut registry = MockSchemaRegistry::new();
        registry.latest = Some(SchemaHandle::new(1, ORDERS_V1).with_version(1));
        registry.created_id = 42;
        let registry = Arc::new(registry);

        let topic = producer_topic();
        let handle = resolver(registry.clone()).resolve(&topic).await.unwrap();

        assert_eq!(handle.id(), 42);
        assert_eq!(handle.definition(), ORDERS_V2);
        assert_eq!(topic.schema(), Some(&handle));
        assert_eq!(registry.calls().create, 1);
    }

    #[tokio::test]
    async fn test_empty_subject_falls_through_to_create() {
        let registry = Arc::new(MockSchemaRegistry::new());
        let topic = producer_topic();

        let handle = resolver(registry.clone()).resolve(&topic).await.unwrap();
        assert_eq!(handle.id(), 100);
        assert_eq!(registry.calls().create, 1);
    }

    #[tokio::test]
    async fn test_failed_check_still_negotiates() {
        let mut registry = MockSchemaRegistry::new();
        registry.fail_check = true;
        registry.latest = Some(SchemaHandle::new(5, ORDERS_V2).with_version(2));
        let registry = Arc::new(registry);

        let handle = resolver(registry.clone())
            .resolve(&producer_topic())
            .await
            .unwrap();
        assert_eq!(handle.id(), 5);
        assert_eq!(registry.calls().create, 0);
    }

    #[tokio::test]
    async fn test_create_failure_is_returned_verbatim() {
        let mut registry = MockSchemaRegistry::new();
        registry.fail_create = true;
        let registry = Arc::new(registry);

        let err = resolver(registry)
            .resolve(&producer_topic())
            .await
            .unwrap_err();
        assert_eq!(
            err.source,
            RegistryError::Rejected {
                status: 409,
                message: "Mock failure".into()
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_resolves_negotiate_once() {
        let registry = Arc::new(MockSchemaRegistry::new());
        let resolver = resolver(registry.clone());
        let topic = Arc::new(producer_topic());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                let topic = topic.clone();
                tokio::spawn(async move { resolver.resolve(&topic).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().id(), 100);
        }
        assert_eq!(registry.calls().create, 1);
    }
}
