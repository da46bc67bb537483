//! # Schema Negotiation Flows
//!
//! Resolution against a shared registry: adopt what is there when it is
//! recent enough, register otherwise, and never register without intent.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use schema_bus::{
        handler_fn, Envelope, ErrorKind, HandlerBinding, HandlerError, MessageBrokerApi, Topic,
    };

    use crate::fixtures::{
        fast_retry, join_listener, orders_topic, Harness, ORDER_SCHEMA_V1, ORDER_SCHEMA_V2,
    };

    fn noop_binding(topic: Arc<Topic>) -> HandlerBinding {
        HandlerBinding::new(
            "noop",
            topic,
            handler_fn(|_envelope: Envelope| async { Ok::<(), HandlerError>(()) }),
        )
    }

    #[tokio::test]
    async fn test_newer_desired_version_registers_over_older_subject() {
        let harness = Harness::new(fast_retry(0, true));
        let v1 = harness.registry.seed("orders-value", ORDER_SCHEMA_V1);

        let topic = orders_topic();
        let handle = harness.broker.set_schema(&topic).await.unwrap();

        let calls = harness.registry.calls();
        assert_eq!(calls.create, 1);
        assert_ne!(handle.id(), v1.id());
        assert_eq!(handle.version(), Some(2));
        assert_eq!(topic.schema(), Some(&handle));
        assert_eq!(harness.registry.versions("orders-value").len(), 2);
    }

    #[tokio::test]
    async fn test_identical_text_is_adopted_once() {
        let harness = Harness::new(fast_retry(0, true));
        let existing = harness.registry.seed("orders-value", ORDER_SCHEMA_V2);

        let topic = orders_topic();
        let first = harness.broker.set_schema(&topic).await.unwrap();
        let second = harness.broker.set_schema(&topic).await.unwrap();

        assert_eq!(first, existing);
        assert_eq!(first, second);
        let calls = harness.registry.calls();
        assert_eq!(calls.create, 0);
        assert_eq!(calls.check, 1);
    }

    #[tokio::test]
    async fn test_latest_at_desired_version_is_adopted() {
        let harness = Harness::new(fast_retry(0, true));
        harness.registry.seed("orders-value", ORDER_SCHEMA_V1);
        let latest = harness.registry.seed("orders-value", ORDER_SCHEMA_V2);

        // Same version, different (compatible) text: adopt, do not register.
        let topic = Topic::new("orders")
            .with_schema(2, ORDER_SCHEMA_V2.replace("\"note\"", "\"comment\""))
            .register_schema(true);
        let handle = harness.broker.set_schema(&topic).await.unwrap();

        assert_eq!(handle, latest);
        assert_eq!(harness.registry.calls().create, 0);
    }

    #[tokio::test]
    async fn test_without_intent_missing_subject_aborts_listen() {
        let harness = Harness::new(fast_retry(0, true));
        let topic = Arc::new(Topic::new("orders").with_schema(1, ORDER_SCHEMA_V1));

        let (task, _cancel) = harness.spawn_listen(vec![noop_binding(topic.clone())]);
        let err = join_listener(task).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaResolution);
        assert_eq!(harness.registry.calls().create, 0);
        assert!(!topic.is_resolved());
        assert!(!harness.transport.is_closed());
    }

    #[tokio::test]
    async fn test_two_brokers_share_one_registration() {
        let harness = Harness::new(fast_retry(0, true));
        let other = Harness::new(fast_retry(0, true));
        let shared = harness.registry.clone();
        let other_broker = schema_bus::MessageBroker::builder()
            .transport(other.transport.clone())
            .registry(shared.clone())
            .consumer_group("other")
            .build()
            .unwrap();

        let a = harness.broker.set_schema(&orders_topic()).await.unwrap();
        let b = other_broker.set_schema(&orders_topic()).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(shared.versions("orders-value").len(), 1);
        assert_eq!(shared.calls().create, 1);
    }

    #[tokio::test]
    async fn test_unavailable_registry_surfaces_verbatim() {
        let harness = Harness::new(fast_retry(0, true));
        harness.registry.set_unavailable(true);

        let err = harness.broker.set_schema(&orders_topic()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaResolution);
        assert!(err.to_string().contains("orders-value"));
        assert!(err.to_string().contains("unavailable"));
    }
}
