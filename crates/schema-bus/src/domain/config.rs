//! # Broker Configuration
//!
//! Serde model of the `broker` section. Loading and layering (file plus
//! environment) is done by the caller through the `config` crate; this
//! module only owns the fields, their defaults and validation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::BrokerError;
use super::retry_policy::RetryPolicy;
use super::topic::Topic;

/// Config key holding the broker section.
pub const BROKER_SECTION: &str = "broker";

/// Default bytes discarded by the decode fallback (magic byte + schema id).
pub const DEFAULT_SCHEMA_ID_PREFIX_LEN: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub enabled: bool,
    /// Broker protocol version hint passed to the transport.
    pub version: Option<String>,
    pub consume_only: bool,
    pub consumer_group_id: String,
    pub from_oldest: bool,
    /// Schema registry base URL.
    pub schema_registry: Option<String>,
    pub brokers: Vec<String>,
    pub tls: Option<TlsSettings>,
    pub retry: RetryConfig,
    pub shutdown_timeout_ms: u64,
    pub nack_resend_delay_ms: u64,
    pub reconnect_retry_delay_ms: u64,
    pub schema_id_prefix_len: usize,
    pub topics: BTreeMap<String, TopicConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            version: None,
            consume_only: false,
            consumer_group_id: String::new(),
            from_oldest: true,
            schema_registry: None,
            brokers: Vec::new(),
            tls: None,
            retry: RetryConfig::default(),
            shutdown_timeout_ms: 30_000,
            nack_resend_delay_ms: 60_000,
            reconnect_retry_delay_ms: 60_000,
            schema_id_prefix_len: DEFAULT_SCHEMA_ID_PREFIX_LEN,
            topics: BTreeMap::new(),
        }
    }
}

impl BrokerConfig {
    /// Extract the `broker` section from a built configuration.
    pub fn from_config(source: &config::Config) -> Result<Self, BrokerError> {
        Ok(source.get::<BrokerConfig>(BROKER_SECTION)?)
    }

    /// Enabled broker with sensible local defaults. Mostly for tests.
    pub fn enabled(group: impl Into<String>) -> Self {
        Self {
            enabled: true,
            consumer_group_id: group.into(),
            brokers: vec!["localhost:9092".to_string()],
            ..Self::default()
        }
    }

    /// Check cross-field constraints. A disabled broker is always valid.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if !self.enabled {
            return Ok(());
        }
        if self.brokers.is_empty() {
            return Err(BrokerError::InvalidConfig(
                "enabled broker needs at least one endpoint".into(),
            ));
        }
        if self.consumer_group_id.trim().is_empty() {
            return Err(BrokerError::InvalidConfig(
                "consumer_group_id must not be empty".into(),
            ));
        }
        self.retry_policy().validate()?;
        for (name, topic) in &self.topics {
            if topic.register_schema && topic.raw_schema.is_none() && topic.schema_file.is_none()
            {
                return Err(BrokerError::InvalidConfig(format!(
                    "topic '{name}' registers its schema but provides none"
                )));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn nack_resend_delay(&self) -> Duration {
        Duration::from_millis(self.nack_resend_delay_ms)
    }

    pub fn reconnect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_retry_delay_ms)
    }

    /// Build every configured topic.
    pub fn build_topics(&self) -> Result<Vec<Topic>, BrokerError> {
        self.topics
            .iter()
            .map(|(name, topic)| topic.to_topic(name))
            .collect()
    }
}

/// Per-topic schema settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub version: i32,
    pub raw_schema: Option<String>,
    /// Alternative to `raw_schema`: read the definition from disk.
    pub schema_file: Option<PathBuf>,
    pub register_schema: bool,
}

impl TopicConfig {
    pub fn to_topic(&self, name: &str) -> Result<Topic, BrokerError> {
        let raw = match (&self.raw_schema, &self.schema_file) {
            (Some(raw), _) => raw.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                BrokerError::InvalidConfig(format!(
                    "schema file {} for topic '{name}': {e}",
                    path.display()
                ))
            })?,
            (None, None) => String::new(),
        };
        Ok(Topic::new(name)
            .with_schema(self.version, raw)
            .register_schema(self.register_schema))
    }
}

/// Retry fields as they appear in config files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    pub max_elapsed_ms: u64,
    pub ack_after_max_retries: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_interval_ms: policy.initial_interval.as_millis() as u64,
            multiplier: policy.multiplier,
            max_interval_ms: policy.max_interval.as_millis() as u64,
            max_elapsed_ms: policy.max_elapsed_time.as_millis() as u64,
            ack_after_max_retries: policy.ack_after_max_retries,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_interval: Duration::from_millis(cfg.initial_interval_ms),
            multiplier: cfg.multiplier,
            max_interval: Duration::from_millis(cfg.max_interval_ms),
            max_elapsed_time: Duration::from_millis(cfg.max_elapsed_ms),
            ack_after_max_retries: cfg.ack_after_max_retries,
        }
    }
}

/// Client TLS material, as file paths.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub ca_cert_pem: PathBuf,
    pub cert_pem: PathBuf,
    pub key_pem: PathBuf,
    pub skip_verify: bool,
    pub timeout_secs: u64,
}

impl TlsSettings {
    /// Request timeout, falling back to 10s when unset.
    pub fn timeout(&self) -> Duration {
        if self.timeout_secs == 0 {
            Duration::from_secs(10)
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }
}
