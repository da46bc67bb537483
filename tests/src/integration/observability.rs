//! # Observability Flows
//!
//! Broker events recorded through the Prometheus observer from
//! `bus-telemetry` while real traffic flows.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bus_telemetry::PrometheusObserver;
    use schema_bus::adapters::{FanoutObserver, InMemoryTransport, TracingObserver};
    use schema_bus::{handler_fn, BrokerObserver, Envelope, HandlerBinding, HandlerError};

    use crate::fixtures::{fast_retry, join_listener, orders_topic, wait_until, Harness, Order};

    #[tokio::test]
    async fn test_metrics_follow_publish_retry_and_delivery() {
        let metrics = Arc::new(PrometheusObserver::new().unwrap());
        let observer: Arc<dyn BrokerObserver> = Arc::new(
            FanoutObserver::default()
                .with(Arc::new(TracingObserver))
                .with(metrics.clone()),
        );
        let harness = Harness::with(InMemoryTransport::new(2), fast_retry(2, true), observer);
        let topic = Arc::new(orders_topic());

        for i in 0..3 {
            harness
                .broker
                .publish(&topic, &Order::new(format!("o-{i}"), i))
                .await
                .unwrap();
        }

        // First delivery fails once before succeeding.
        let calls = Arc::new(AtomicU32::new(0));
        let binding = HandlerBinding::new(
            "metered",
            topic.clone(),
            handler_fn({
                let calls = calls.clone();
                move |_envelope: Envelope| {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            return Err(HandlerError::new("first call fails"));
                        }
                        Ok::<(), HandlerError>(())
                    }
                }
            }),
        );

        let (task, cancel) = harness.spawn_listen(vec![binding]);
        let transport = harness.transport.clone();
        assert!(wait_until(Duration::from_secs(3), || transport.stats("orders").acked == 3).await);
        assert_eq!(metrics.running_workers(), 2);
        cancel.cancel();
        join_listener(task).await.unwrap();

        let text = metrics.encode().unwrap();
        assert!(text.contains("schema_bus_messages_published_total{topic=\"orders\"} 3"));
        assert!(text.contains("schema_bus_handler_retries_total{topic=\"orders\"} 1"));
        assert!(text.contains("schema_bus_deliveries_total{outcome=\"ack\",topic=\"orders\"} 3"));
        assert!(text.contains("schema_bus_schema_resolutions_total{outcome=\"created\"} 1"));
        assert_eq!(metrics.running_workers(), 0);
    }
}
