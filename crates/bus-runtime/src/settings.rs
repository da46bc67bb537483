//! # Runtime Settings
//!
//! Layered configuration: an optional `config/<env>` file (any format the
//! `config` crate recognizes by extension) overlaid by `SB__`-prefixed
//! environment variables, e.g. `SB__BROKER__CONSUMER_GROUP_ID=billing`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use config::{Config, Environment, File};
use schema_bus::BrokerConfig;
use serde::Deserialize;
use thiserror::Error;

/// Variable selecting the deployment environment.
pub const ENV_SELECTOR: &str = "SB_ENV";

/// Prefix of overriding environment variables.
pub const ENV_PREFIX: &str = "SB";

/// Separator between prefix and nested keys.
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown environment '{0}' (expected local, test, dev or prod)")]
    UnknownEnvironment(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid broker configuration: {0}")]
    Invalid(#[from] schema_bus::BrokerError),
}

/// Deployment environment; names the config file to load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeployEnv {
    #[default]
    Local,
    Test,
    Dev,
    Prod,
}

impl DeployEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Test => "test",
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }

    /// Read [`ENV_SELECTOR`]; unset means [`DeployEnv::Local`].
    pub fn from_env() -> Result<Self, SettingsError> {
        match std::env::var(ENV_SELECTOR) {
            Ok(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(Self::default()),
        }
    }
}

impl FromStr for DeployEnv {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "test" => Ok(Self::Test),
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            other => Err(SettingsError::UnknownEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for DeployEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the runtime reads from configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Overrides the telemetry log level when set.
    pub log_level: Option<String>,
    pub broker: BrokerConfig,
}

impl RuntimeSettings {
    /// Load `<config_dir>/<env>.*` plus process environment overrides.
    pub fn load(config_dir: &Path, env: DeployEnv) -> Result<Self, SettingsError> {
        Self::load_with(config_dir, env, env_source())
    }

    /// Load with an explicit environment source.
    pub fn load_with(
        config_dir: &Path,
        env: DeployEnv,
        overrides: Environment,
    ) -> Result<Self, SettingsError> {
        let file = config_dir.join(env.as_str());
        let source = Config::builder()
            .add_source(File::with_name(&file.to_string_lossy()).required(false))
            .add_source(overrides)
            .build()?;

        let settings: RuntimeSettings = source.try_deserialize()?;
        settings.broker.validate()?;
        Ok(settings)
    }
}

/// `SB__`-prefixed variables; `broker.brokers` accepts a comma list.
pub fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("broker.brokers")
}
