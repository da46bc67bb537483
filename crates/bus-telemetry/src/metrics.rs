//! Prometheus metrics for broker events.
//!
//! [`PrometheusObserver`] owns its registry, so several brokers (or tests)
//! in one process never collide on metric registration.

use std::time::Duration;

use prometheus::{
    exponential_buckets, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use schema_bus::{
    BrokerError, BrokerObserver, Disposition, HandlerError, Message, ResolutionOutcome,
    SchemaHandle, SchemaResolutionError,
};

use crate::TelemetryError;

/// `outcome` label for a resolution that ended in an error.
const RESOLUTION_FAILED: &str = "failed";

/// Records broker events into a private Prometheus registry.
pub struct PrometheusObserver {
    registry: Registry,

    // =========================================================================
    // PUBLISH
    // =========================================================================
    messages_published: IntCounterVec,
    publish_failures: IntCounterVec,

    // =========================================================================
    // CONSUME
    // =========================================================================
    deliveries: IntCounterVec,
    handler_retries: IntCounterVec,
    handler_duration: HistogramVec,
    running_workers: IntGauge,

    // =========================================================================
    // SCHEMA
    // =========================================================================
    schema_resolutions: IntCounterVec,
}

impl PrometheusObserver {
    pub fn new() -> Result<Self, TelemetryError> {
        let init = |e: prometheus::Error| TelemetryError::MetricsInit(e.to_string());

        let messages_published = IntCounterVec::new(
            Opts::new(
                "schema_bus_messages_published_total",
                "Messages handed to the transport",
            ),
            &["topic"],
        )
        .map_err(init)?;
        let publish_failures = IntCounterVec::new(
            Opts::new("schema_bus_publish_failures_total", "Failed publish calls"),
            &["topic"],
        )
        .map_err(init)?;
        let deliveries = IntCounterVec::new(
            Opts::new(
                "schema_bus_deliveries_total",
                "Consumed messages by final disposition",
            ),
            &["topic", "outcome"],
        )
        .map_err(init)?;
        let handler_retries = IntCounterVec::new(
            Opts::new(
                "schema_bus_handler_retries_total",
                "Handler attempts scheduled after a failure",
            ),
            &["topic"],
        )
        .map_err(init)?;
        let handler_duration = HistogramVec::new(
            HistogramOpts::new(
                "schema_bus_handler_duration_seconds",
                "Time from first handler attempt to final disposition",
            )
            .buckets(exponential_buckets(0.001, 2.0, 16).map_err(init)?),
            &["topic"],
        )
        .map_err(init)?;
        let running_workers = IntGauge::new(
            "schema_bus_running_workers",
            "Partition workers currently dispatching",
        )
        .map_err(init)?;
        let schema_resolutions = IntCounterVec::new(
            Opts::new(
                "schema_bus_schema_resolutions_total",
                "Schema resolutions by outcome",
            ),
            &["outcome"],
        )
        .map_err(init)?;

        let registry = Registry::new();
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(messages_published.clone()),
            Box::new(publish_failures.clone()),
            Box::new(deliveries.clone()),
            Box::new(handler_retries.clone()),
            Box::new(handler_duration.clone()),
            Box::new(running_workers.clone()),
            Box::new(schema_resolutions.clone()),
        ];
        for collector in collectors {
            registry.register(collector).map_err(init)?;
        }

        Ok(Self {
            registry,
            messages_published,
            publish_failures,
            deliveries,
            handler_retries,
            handler_duration,
            running_workers,
            schema_resolutions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| TelemetryError::MetricsEncode(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsEncode(e.to_string()))
    }

    pub fn running_workers(&self) -> i64 {
        self.running_workers.get()
    }
}

impl std::fmt::Debug for PrometheusObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusObserver")
            .field("running_workers", &self.running_workers.get())
            .finish_non_exhaustive()
    }
}

impl BrokerObserver for PrometheusObserver {
    fn schema_resolved(&self, _subject: &str, _handle: &SchemaHandle, outcome: ResolutionOutcome) {
        self.schema_resolutions
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    fn schema_resolution_failed(&self, _error: &SchemaResolutionError) {
        self.schema_resolutions
            .with_label_values(&[RESOLUTION_FAILED])
            .inc();
    }

    fn published(&self, topic: &str) {
        self.messages_published.with_label_values(&[topic]).inc();
    }

    fn publish_failed(&self, topic: &str, _error: &BrokerError) {
        self.publish_failures.with_label_values(&[topic]).inc();
    }

    fn handler_retry(&self, topic: &str, _attempt: u32, _delay: Duration, _error: &HandlerError) {
        self.handler_retries.with_label_values(&[topic]).inc();
    }

    fn delivery_completed(
        &self,
        message: &Message,
        disposition: Disposition,
        _attempts: u32,
        elapsed: Duration,
    ) {
        self.deliveries
            .with_label_values(&[message.topic.as_str(), disposition.as_str()])
            .inc();
        self.handler_duration
            .with_label_values(&[message.topic.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    fn worker_started(&self, _topic: &str, _partition: i32) {
        self.running_workers.inc();
    }

    fn worker_stopped(&self, _topic: &str, _partition: i32) {
        self.running_workers.dec();
    }
}
