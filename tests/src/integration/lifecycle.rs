//! # Lifecycle Flows
//!
//! `Configured → Running → Stopped`, driven by cancellation or `stop`, with
//! disabled and consume-only brokers refusing I/O up front.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use schema_bus::adapters::{InMemorySchemaRegistry, InMemoryTransport};
    use schema_bus::{
        handler_fn, BrokerError, BrokerState, Envelope, ErrorKind, HandlerBinding, HandlerError,
        LifecycleError, MessageBroker, MessageBrokerApi,
    };
    use tokio_util::sync::CancellationToken;

    use crate::fixtures::{fast_retry, join_listener, orders_topic, wait_until, Harness, Order};

    fn noop_binding() -> HandlerBinding {
        HandlerBinding::new(
            "noop",
            Arc::new(orders_topic()),
            handler_fn(|_envelope: Envelope| async { Ok::<(), HandlerError>(()) }),
        )
    }

    async fn wait_running(broker: &MessageBroker) {
        assert!(
            wait_until(Duration::from_secs(3), || broker.state() == BrokerState::Running).await,
            "broker never reached Running"
        );
    }

    // =========================================================================
    // DISABLED / CONSUME-ONLY
    // =========================================================================

    #[tokio::test]
    async fn test_disabled_broker_refuses_everything_without_io() {
        let transport = Arc::new(InMemoryTransport::new(1));
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let broker = MessageBroker::builder()
            .enabled(false)
            .transport(transport.clone())
            .registry(registry.clone())
            .build()
            .unwrap();

        let topic = orders_topic();
        let err = broker.publish(&topic, &Order::new("x", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = broker.set_schema(&topic).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotEnabled));
        let err = broker
            .listen(vec![noop_binding()], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotEnabled));
        broker.stop().await.unwrap();

        assert_eq!(broker.state(), BrokerState::Uninitialized);
        assert_eq!(registry.calls(), Default::default());
        assert_eq!(transport.stats("orders").published, 0);
    }

    #[tokio::test]
    async fn test_consume_only_broker_listens_but_cannot_publish() {
        let transport = Arc::new(InMemoryTransport::new(1));
        let broker = Arc::new(
            MessageBroker::builder()
                .consume_only(true)
                .transport(transport.clone())
                .registry(Arc::new(InMemorySchemaRegistry::new()))
                .consumer_group("readers")
                .build()
                .unwrap(),
        );

        let err = broker
            .publish(&orders_topic(), &Order::new("x", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert_eq!(transport.stats("orders").published, 0);

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let broker = broker.clone();
            let cancel = cancel.clone();
            async move { broker.listen(vec![noop_binding()], cancel).await }
        });
        wait_running(&broker).await;
        cancel.cancel();
        join_listener(task).await.unwrap();
    }

    // =========================================================================
    // STOP AND CANCEL
    // =========================================================================

    #[tokio::test]
    async fn test_stop_before_listen_and_twice() {
        let harness = Harness::new(fast_retry(0, true));
        harness.broker.stop().await.unwrap();
        harness.broker.stop().await.unwrap();
        assert_eq!(harness.broker.state(), BrokerState::Configured);
        assert_eq!(harness.transport.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_ends_listen_and_closes_once() {
        let harness = Harness::new(fast_retry(0, true));
        let (task, _cancel) = harness.spawn_listen(vec![noop_binding()]);
        wait_running(&harness.broker).await;

        let (first, second) = tokio::join!(harness.broker.stop(), harness.broker.stop());
        first.unwrap();
        second.unwrap();
        join_listener(task).await.unwrap();

        assert_eq!(harness.broker.state(), BrokerState::Stopped);
        assert_eq!(harness.transport.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_lets_the_current_message_finish() {
        let harness = Harness::new(fast_retry(0, true));
        harness
            .broker
            .publish(&orders_topic(), &Order::new("slow", 1))
            .await
            .unwrap();

        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let binding = HandlerBinding::new(
            "slow",
            Arc::new(orders_topic()),
            handler_fn({
                let started = started.clone();
                let finished = finished.clone();
                move |_envelope: Envelope| {
                    let started = started.clone();
                    let finished = finished.clone();
                    async move {
                        started.store(true, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        finished.store(true, Ordering::SeqCst);
                        Ok::<(), HandlerError>(())
                    }
                }
            }),
        );

        let (task, cancel) = harness.spawn_listen(vec![binding]);
        assert!(wait_until(Duration::from_secs(3), || started.load(Ordering::SeqCst)).await);
        cancel.cancel();
        join_listener(task).await.unwrap();

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(harness.transport.stats("orders").acked, 1);
        assert!(harness.transport.is_closed());
        assert_eq!(harness.broker.state(), BrokerState::Stopped);
    }

    #[tokio::test]
    async fn test_listen_after_stop_and_concurrent_listen_are_rejected() {
        let harness = Harness::new(fast_retry(0, true));
        let (task, cancel) = harness.spawn_listen(vec![noop_binding()]);
        wait_running(&harness.broker).await;

        let err = harness
            .broker
            .listen(vec![noop_binding()], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Lifecycle(LifecycleError::InvalidTransition { .. })
        ));

        cancel.cancel();
        join_listener(task).await.unwrap();

        let err = harness
            .broker
            .listen(vec![noop_binding()], CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
    }

    #[tokio::test]
    async fn test_stuck_handler_is_abandoned_after_timeout() {
        let harness = Harness::new(fast_retry(0, true));
        harness
            .broker
            .publish(&orders_topic(), &Order::new("stuck", 1))
            .await
            .unwrap();

        let binding = HandlerBinding::new(
            "stuck",
            Arc::new(orders_topic()),
            handler_fn(|_envelope: Envelope| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<(), HandlerError>(())
            }),
        );
        let (task, _cancel) = harness.spawn_listen(vec![binding]);
        let transport = harness.transport.clone();
        assert!(wait_until(Duration::from_secs(3), || transport.stats("orders").pending == 0).await);

        // Shutdown timeout is 500ms; stop must not wait for the handler.
        tokio::time::timeout(Duration::from_secs(3), harness.broker.stop())
            .await
            .unwrap()
            .unwrap();
        join_listener(task).await.unwrap();

        let stats = harness.transport.stats("orders");
        assert_eq!((stats.acked, stats.nacked), (0, 0));
        assert!(harness.transport.is_closed());
    }
}
