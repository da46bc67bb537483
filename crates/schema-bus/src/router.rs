//! # Router
//!
//! Owns the subscriptions of a listening broker and its run/stop lifecycle.
//!
//! ## Scheduling
//!
//! ```text
//! listen ──► resolve every topic ──► subscribe every topic
//!                                      │
//!            one acceptor per subscription ──► one worker per partition
//!                                                 │
//!                         recv ─► HandlerChain ─► ack / nack (sequential)
//! ```
//!
//! `listen` blocks until the caller's token fires, `stop` is called, or a
//! partition stream reports a fatal transport error. A failed ack or nack
//! is logged and only affects that record. Shutdown lets each worker finish
//! its current message, waits at most `shutdown_timeout`, aborts whatever is
//! left, then closes the transport. Whichever of `listen` and `stop` moves
//! the state to `Stopped` performs the close; the other does not.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::algorithms::SchemaResolver;
use crate::codec::{Envelope, PayloadCodec};
use crate::domain::{BrokerError, BrokerState, LifecycleError, Topic, TransportError};
use crate::middleware::{HandlerChain, RetryMiddleware};
use crate::ports::inbound::HandlerBinding;
use crate::ports::outbound::{
    BrokerObserver, PartitionStream, SubscribeOptions, Subscription, Transport,
};

/// Extra wait granted to `stop` on top of the drain timeout before it
/// closes the transport on its own.
const STOP_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    pub subscribe: SubscribeOptions,
    pub shutdown_timeout: Duration,
}

struct Lifecycle {
    state: BrokerState,
    shutdown: CancellationToken,
    drained: Option<watch::Receiver<bool>>,
}

pub struct Router {
    transport: Arc<dyn Transport>,
    resolver: SchemaResolver,
    codec: PayloadCodec,
    retry: Arc<RetryMiddleware>,
    observer: Arc<dyn BrokerObserver>,
    config: RouterConfig,
    lifecycle: Mutex<Lifecycle>,
}

/// A binding that passed startup.
struct ActiveRoute {
    chain: Arc<HandlerChain>,
    topic: Arc<Topic>,
    subscription: Box<dyn Subscription>,
}

/// Everything a partition worker needs.
#[derive(Clone)]
struct WorkerContext {
    chain: Arc<HandlerChain>,
    topic: Arc<Topic>,
    codec: PayloadCodec,
    observer: Arc<dyn BrokerObserver>,
    shutdown: CancellationToken,
    fatal: mpsc::UnboundedSender<TransportError>,
}

impl Router {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: SchemaResolver,
        codec: PayloadCodec,
        retry: Arc<RetryMiddleware>,
        observer: Arc<dyn BrokerObserver>,
        config: RouterConfig,
    ) -> Self {
        let router = Self {
            transport,
            resolver,
            codec,
            retry,
            observer,
            config,
            lifecycle: Mutex::new(Lifecycle {
                state: BrokerState::Uninitialized,
                shutdown: CancellationToken::new(),
                drained: None,
            }),
        };
        router.transition(BrokerState::Configured);
        router
    }

    pub fn state(&self) -> BrokerState {
        self.lifecycle.lock().state
    }

    // =========================================================================
    // LISTEN
    // =========================================================================

    /// Dispatch until cancelled, stopped, or a fatal transport error.
    pub async fn run(
        &self,
        bindings: Vec<HandlerBinding>,
        cancel: CancellationToken,
    ) -> Result<(), BrokerError> {
        let (shutdown, drained_tx) = self.begin()?;

        let routes = match self.start(bindings).await {
            Ok(routes) => routes,
            Err(err) => {
                warn!(error = %err, "listener startup aborted");
                self.abort_startup();
                let _ = drained_tx.send(true);
                return Err(err);
            }
        };

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let mut acceptors = JoinSet::new();
        for route in routes {
            let ctx = WorkerContext {
                chain: route.chain,
                topic: route.topic,
                codec: self.codec.clone(),
                observer: self.observer.clone(),
                shutdown: shutdown.clone(),
                fatal: fatal_tx.clone(),
            };
            acceptors.spawn(accept_partitions(route.subscription, ctx));
        }
        info!(routes = acceptors.len(), "listener running");

        let fatal = tokio::select! {
            _ = cancel.cancelled() => {
                info!("listener cancelled by caller");
                None
            }
            _ = shutdown.cancelled() => {
                info!("listener stopped");
                None
            }
            Some(err) = fatal_rx.recv() => {
                error!(error = %err, "fatal transport error, shutting listener down");
                Some(err)
            }
        };

        shutdown.cancel();
        self.drain(&mut acceptors).await;
        let _ = drained_tx.send(true);

        let close = if self.finish() {
            self.close_transport().await
        } else {
            Ok(())
        };

        match (fatal, close) {
            (Some(err), _) => Err(LifecycleError::Fatal(err).into()),
            (None, Err(err)) => Err(err.into()),
            (None, Ok(())) => Ok(()),
        }
    }

    /// Resolve every schema, then open every subscription. Nothing is
    /// subscribed unless all topics resolved.
    async fn start(&self, bindings: Vec<HandlerBinding>) -> Result<Vec<ActiveRoute>, BrokerError> {
        try_join_all(
            bindings
                .iter()
                .map(|binding| self.resolver.resolve(&binding.topic)),
        )
        .await?;

        let mut routes = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let topic_name = binding.topic.name().to_string();
            let subscription = self
                .transport
                .subscribe(&topic_name, &self.config.subscribe)
                .await
                .map_err(|source| LifecycleError::Subscribe {
                    topic: topic_name.clone(),
                    source,
                })?;
            debug!(handler = %binding.name, topic = %topic_name, "handler bound");
            routes.push(ActiveRoute {
                chain: Arc::new(HandlerChain::new(
                    binding.name,
                    binding.handler,
                    self.retry.clone(),
                )),
                topic: binding.topic,
                subscription,
            });
        }
        Ok(routes)
    }

    async fn drain(&self, acceptors: &mut JoinSet<()>) {
        let wait_all = async { while acceptors.join_next().await.is_some() {} };
        if tokio::time::timeout(self.config.shutdown_timeout, wait_all)
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "handlers exceeded shutdown timeout, abandoning in-flight messages"
            );
            acceptors.shutdown().await;
        }
    }

    // =========================================================================
    // STOP
    // =========================================================================

    /// Stop a running listener. No-op before `listen` and after a previous
    /// stop.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        let drained = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != BrokerState::Running {
                debug!(state = ?lifecycle.state, "stop requested while not running");
                return Ok(());
            }
            lifecycle.state = BrokerState::Stopped;
            lifecycle.shutdown.cancel();
            lifecycle.drained.clone()
        };
        self.observer
            .lifecycle_changed(BrokerState::Running, BrokerState::Stopped);

        if let Some(mut drained) = drained {
            let wait = drained.wait_for(|done| *done);
            if tokio::time::timeout(self.config.shutdown_timeout + STOP_GRACE, wait)
                .await
                .is_err()
            {
                warn!("listener did not drain in time, closing transport anyway");
            }
        }

        self.close_transport().await.map_err(Into::into)
    }

    // =========================================================================
    // STATE HELPERS
    // =========================================================================

    fn transition(&self, next: BrokerState) {
        let from = {
            let mut lifecycle = self.lifecycle.lock();
            let from = lifecycle.state;
            if lifecycle.state.transition(next).is_err() {
                return;
            }
            from
        };
        self.observer.lifecycle_changed(from, next);
    }

    /// `Configured → Running` with a fresh shutdown token.
    fn begin(&self) -> Result<(CancellationToken, watch::Sender<bool>), LifecycleError> {
        let (tx, rx) = watch::channel(false);
        let shutdown = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state.transition(BrokerState::Running)?;
            lifecycle.shutdown = CancellationToken::new();
            lifecycle.drained = Some(rx);
            lifecycle.shutdown.clone()
        };
        self.observer
            .lifecycle_changed(BrokerState::Configured, BrokerState::Running);
        Ok((shutdown, tx))
    }

    fn abort_startup(&self) {
        let reverted = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.drained = None;
            lifecycle.state.transition(BrokerState::Configured).is_ok()
        };
        if reverted {
            self.observer
                .lifecycle_changed(BrokerState::Running, BrokerState::Configured);
        }
    }

    /// Take the terminal transition if nobody else did. Returns whether this
    /// caller now owns closing the transport.
    fn finish(&self) -> bool {
        let owned = self
            .lifecycle
            .lock()
            .state
            .transition(BrokerState::Stopped)
            .is_ok();
        if owned {
            self.observer
                .lifecycle_changed(BrokerState::Running, BrokerState::Stopped);
        }
        owned
    }

    async fn close_transport(&self) -> Result<(), LifecycleError> {
        match tokio::time::timeout(self.config.shutdown_timeout, self.transport.close()).await {
            Ok(Ok(())) => {
                info!("transport closed");
                Ok(())
            }
            Ok(Err(err)) => Err(LifecycleError::Close(err)),
            Err(_) => Err(LifecycleError::CloseTimeout(self.config.shutdown_timeout)),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// WORKERS
// =============================================================================

async fn accept_partitions(mut subscription: Box<dyn Subscription>, ctx: WorkerContext) {
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            next = subscription.next_partition() => match next {
                Some(stream) => {
                    workers.spawn(run_partition(stream, ctx.clone()));
                }
                None => break,
            },
        }
    }
    while workers.join_next().await.is_some() {}
}

async fn run_partition(mut stream: Box<dyn PartitionStream>, ctx: WorkerContext) {
    let topic = ctx.topic.name();
    let partition = stream.partition();
    debug!(topic, partition, handler = ctx.chain.name(), "partition worker started");
    ctx.observer.worker_started(topic, partition);

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            next = stream.recv() => next,
        };
        let delivery = match next {
            None => break,
            Some(Ok(delivery)) => delivery,
            Some(Err(err)) => {
                let _ = ctx.fatal.send(err);
                break;
            }
        };

        let (message, acker) = delivery.into_parts();
        let mut envelope = Envelope::new(message, ctx.topic.clone(), ctx.codec.clone());
        let outcome = ctx.chain.dispatch(&mut envelope).await;

        let settled = if outcome.disposition.is_ack() {
            acker.ack()
        } else {
            acker.nack()
        };
        ctx.observer.delivery_completed(
            envelope.message(),
            outcome.disposition,
            outcome.attempts,
            outcome.elapsed,
        );
        // A settle failure is per-record (typically a revoked partition);
        // the record is redelivered to whoever owns the partition next.
        if let Err(err) = settled {
            warn!(
                topic,
                partition,
                offset = envelope.message().offset,
                error = %err,
                "failed to settle delivery"
            );
        }
    }

    ctx.observer.worker_stopped(topic, partition);
    debug!(topic, partition, "partition worker stopped");
}
