//! # Publish / Listen Flows
//!
//! Typed payloads published through the broker reach handlers on every
//! partition; Confluent-framed payloads written by other producers decode
//! through the schema-id prefix fallback.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use schema_bus::adapters::AvroCodec;
    use schema_bus::{
        handler_fn, Codec, Envelope, ErrorKind, HandlerBinding, HandlerError, MessageBrokerApi,
        OutboundMessage,
    };

    use crate::fixtures::{join_listener, orders_topic, fast_retry, wait_until, Harness, Order};

    fn collecting_binding(topic: Arc<schema_bus::Topic>, seen: Arc<Mutex<Vec<Order>>>) -> HandlerBinding {
        HandlerBinding::new(
            "collect-orders",
            topic,
            handler_fn(move |envelope: Envelope| {
                let seen = seen.clone();
                async move {
                    let order: Order = envelope.decode()?;
                    seen.lock().push(order);
                    Ok::<(), HandlerError>(())
                }
            }),
        )
    }

    // =========================================================================
    // ROUND TRIP
    // =========================================================================

    #[tokio::test]
    async fn test_published_orders_reach_the_handler() {
        let harness = Harness::new(fast_retry(2, true));
        let topic = Arc::new(orders_topic());

        for i in 0..10 {
            harness
                .broker
                .publish_with_key(&topic, format!("customer-{}", i % 4), &Order::new(format!("o-{i}"), i * 100))
                .await
                .unwrap();
        }
        assert_eq!(harness.transport.stats("orders").published, 10);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (task, cancel) = harness.spawn_listen(vec![collecting_binding(topic, seen.clone())]);

        assert!(wait_until(Duration::from_secs(3), || seen.lock().len() == 10).await);
        cancel.cancel();
        join_listener(task).await.unwrap();

        let ids: BTreeSet<String> = seen.lock().iter().map(|o| o.id.clone()).collect();
        assert_eq!(ids.len(), 10);
        assert_eq!(harness.transport.stats("orders").acked, 10);
    }

    #[tokio::test]
    async fn test_same_key_keeps_publish_order() {
        let harness = Harness::new(fast_retry(0, true));
        let topic = Arc::new(orders_topic());

        for i in 0..20 {
            harness
                .broker
                .publish_with_key(&topic, "customer-1", &Order::new(format!("{i}"), i))
                .await
                .unwrap();
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (task, cancel) = harness.spawn_listen(vec![collecting_binding(topic, seen.clone())]);
        assert!(wait_until(Duration::from_secs(3), || seen.lock().len() == 20).await);
        cancel.cancel();
        join_listener(task).await.unwrap();

        let amounts: Vec<i64> = seen.lock().iter().map(|o| o.amount_cents).collect();
        assert_eq!(amounts, (0..20).collect::<Vec<_>>());
    }

    // =========================================================================
    // PREFIX FALLBACK
    // =========================================================================

    #[tokio::test]
    async fn test_confluent_framed_payload_decodes() {
        let harness = Harness::new(fast_retry(0, false));
        let topic = Arc::new(orders_topic());
        let handle = harness.broker.set_schema(&topic).await.unwrap();

        let datum = AvroCodec::new()
            .encode(&handle, &serde_json::to_value(Order::new("framed", 7)).unwrap())
            .unwrap();
        let mut framed = vec![0u8];
        framed.extend_from_slice(&handle.id().to_be_bytes());
        framed.extend_from_slice(&datum);
        harness
            .transport
            .publish_to("orders", 0, OutboundMessage::new(framed))
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (task, cancel) = harness.spawn_listen(vec![collecting_binding(topic, seen.clone())]);
        assert!(wait_until(Duration::from_secs(3), || seen.lock().len() == 1).await);
        cancel.cancel();
        join_listener(task).await.unwrap();

        assert_eq!(seen.lock()[0], Order::new("framed", 7));
        let stats = harness.transport.stats("orders");
        assert_eq!((stats.acked, stats.nacked), (1, 0));
    }

    // =========================================================================
    // PUBLISH ERRORS
    // =========================================================================

    #[tokio::test]
    async fn test_payload_not_matching_schema_is_an_encoding_error() {
        let harness = Harness::new(fast_retry(0, true));
        let topic = orders_topic();

        let err = harness
            .broker
            .publish(&topic, &serde_json::json!({"id": 42}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert_eq!(harness.transport.stats("orders").published, 0);
        // The schema was still negotiated.
        assert!(topic.is_resolved());
    }
}
