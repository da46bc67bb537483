//! # Retry Flows
//!
//! Handler failures are retried on the owning partition worker; the final
//! disposition (ack, ack after exhaustion, nack) is what the transport sees.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use schema_bus::adapters::InMemoryTransport;
    use schema_bus::{handler_fn, Envelope, HandlerBinding, HandlerError, NoopObserver};

    use crate::fixtures::{fast_retry, join_listener, orders_topic, wait_until, Harness, Order};

    /// Fails the first `failures` invocations, then succeeds.
    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> HandlerBinding {
        HandlerBinding::new(
            "flaky",
            Arc::new(orders_topic()),
            handler_fn(move |_envelope: Envelope| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        return Err(HandlerError::new(format!("failure {n}")));
                    }
                    Ok::<(), HandlerError>(())
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_five_failures_then_success_is_six_calls_and_ack() {
        let harness = Harness::new(fast_retry(5, false));
        harness
            .broker
            .publish(&orders_topic(), &Order::new("o-1", 1))
            .await
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let (task, cancel) = harness.spawn_listen(vec![flaky(5, calls.clone())]);
        let transport = harness.transport.clone();
        assert!(wait_until(Duration::from_secs(3), || transport.stats("orders").acked == 1).await);
        cancel.cancel();
        join_listener(task).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(harness.transport.stats("orders").nacked, 0);
    }

    #[tokio::test]
    async fn test_exhausted_message_is_acked_when_configured() {
        let harness = Harness::new(fast_retry(3, true));
        harness
            .broker
            .publish(&orders_topic(), &Order::new("poison", 1))
            .await
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let (task, cancel) = harness.spawn_listen(vec![flaky(u32::MAX, calls.clone())]);
        let transport = harness.transport.clone();
        assert!(wait_until(Duration::from_secs(3), || transport.stats("orders").acked == 1).await);
        cancel.cancel();
        join_listener(task).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let stats = harness.transport.stats("orders");
        assert_eq!((stats.acked, stats.nacked, stats.pending), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_exhausted_message_is_nacked_and_redelivered() {
        let transport = InMemoryTransport::new(1).with_nack_resend_delay(Duration::from_millis(50));
        let harness = Harness::with(transport, fast_retry(1, false), Arc::new(NoopObserver));
        harness
            .broker
            .publish(&orders_topic(), &Order::new("retry-me", 1))
            .await
            .unwrap();

        // Two calls per delivery; the redelivery's second call succeeds.
        let calls = Arc::new(AtomicU32::new(0));
        let (task, cancel) = harness.spawn_listen(vec![flaky(3, calls.clone())]);
        let transport = harness.transport.clone();
        assert!(wait_until(Duration::from_secs(3), || transport.stats("orders").acked == 1).await);
        cancel.cancel();
        join_listener(task).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(harness.transport.stats("orders").nacked, 1);
    }

    #[tokio::test]
    async fn test_elapsed_budget_caps_attempts() {
        let mut policy = fast_retry(100, true);
        policy.initial_interval = Duration::from_millis(20);
        policy.max_interval = Duration::from_millis(20);
        policy.multiplier = 1.0;
        policy.max_elapsed_time = Duration::from_millis(70);
        let harness = Harness::new(policy);
        harness
            .broker
            .publish(&orders_topic(), &Order::new("slow-poison", 1))
            .await
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let (task, cancel) = harness.spawn_listen(vec![flaky(u32::MAX, calls.clone())]);
        let transport = harness.transport.clone();
        assert!(wait_until(Duration::from_secs(3), || transport.stats("orders").acked == 1).await);
        cancel.cancel();
        join_listener(task).await.unwrap();

        // 20ms sleeps against a 70ms budget: far fewer than 101 calls.
        let made = calls.load(Ordering::SeqCst);
        assert!((2..=5).contains(&made), "made {made} calls");
    }
}
