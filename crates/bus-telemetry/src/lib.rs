//! # Bus Telemetry
//!
//! Observability for schema-bus processes.
//!
//! ## Components
//!
//! - **Logging**: `tracing` subscriber with an `EnvFilter` and either a
//!   pretty console layer or a JSON layer for log shippers.
//! - **Metrics**: [`PrometheusObserver`], a `BrokerObserver` that records
//!   broker events into its own Prometheus registry.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let telemetry = init_telemetry(TelemetryConfig::from_env())?;
//! let broker = MessageBroker::builder()
//!     .observer(telemetry.observer())
//!     // ...
//!     .build()?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SB_SERVICE_NAME` | `schema-bus` | Service name attached to every log line |
//! | `SB_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `SB_JSON_LOGS` | `false` (`true` in containers) | JSON formatted logs |
//! | `SB_CONSOLE_OUTPUT` | `true` | Write logs to stdout at all |

mod config;
mod logging;
mod metrics;

use std::sync::Arc;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingGuard};
pub use metrics::PrometheusObserver;

use schema_bus::adapters::{FanoutObserver, TracingObserver};
use schema_bus::BrokerObserver;
use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Failed to encode metrics: {0}")]
    MetricsEncode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and build the metrics observer.
///
/// The returned guard owns the Prometheus registry; hand
/// [`TelemetryGuard::observer`] to the broker builder.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = Arc::new(PrometheusObserver::new()?);
    let logging = init_logging(&config)?;

    Ok(TelemetryGuard {
        config,
        metrics,
        _logging: logging,
    })
}

/// Keeps telemetry alive for the process lifetime.
pub struct TelemetryGuard {
    config: TelemetryConfig,
    metrics: Arc<PrometheusObserver>,
    _logging: LoggingGuard,
}

impl TelemetryGuard {
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<PrometheusObserver> {
        &self.metrics
    }

    /// Observer that logs every broker event and records it as a metric.
    pub fn observer(&self) -> Arc<dyn BrokerObserver> {
        Arc::new(
            FanoutObserver::default()
                .with(Arc::new(TracingObserver))
                .with(self.metrics.clone()),
        )
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.config.service_name, "Shutting down telemetry...");
    }
}

/// Emit a structured event tagged with the component that produced it.
///
/// # Example
///
/// ```rust,ignore
/// use bus_telemetry::log_event;
///
/// log_event!(info, "runtime", "configuration loaded", topics = 3);
/// ```
#[macro_export]
macro_rules! log_event {
    ($level:ident, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };
}

/// Emit a structured event about one topic.
#[macro_export]
macro_rules! log_topic_event {
    ($level:ident, $component:expr, $msg:expr, $topic:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            topic = %$topic,
            $($($field)*,)?
            $msg
        )
    };
}
