//! # Schema-Bus Runtime
//!
//! Loads `config/<SB_ENV>` plus `SB__` environment overrides, then listens
//! on every configured topic until ctrl-c.

use std::path::Path;

use anyhow::{Context, Result};
use bus_runtime::{wire, BusRuntime, DeployEnv, RuntimeSettings};
use bus_telemetry::{init_telemetry, log_event, TelemetryConfig};

const CONFIG_DIR: &str = "config";

#[tokio::main]
async fn main() -> Result<()> {
    let env = DeployEnv::from_env()?;
    let settings = RuntimeSettings::load(Path::new(CONFIG_DIR), env)
        .with_context(|| format!("loading {CONFIG_DIR}/{env}"))?;

    let telemetry_config =
        TelemetryConfig::from_env().with_log_level(settings.log_level.as_deref());
    let telemetry = init_telemetry(telemetry_config)?;
    log_event!(
        info,
        "runtime",
        "configuration loaded",
        env = %env,
        enabled = settings.broker.enabled,
        topics = settings.broker.topics.len()
    );

    let wired = wire(&settings.broker, telemetry.observer())?;
    let runtime = std::sync::Arc::new(BusRuntime::new(wired));

    let listener = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.run().await }
    });
    tokio::pin!(listener);

    tokio::select! {
        joined = &mut listener => {
            return joined.context("listener task panicked")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            log_event!(info, "runtime", "interrupt received");
        }
    }

    runtime.shutdown();
    listener.await.context("listener task panicked")??;

    if let Ok(text) = telemetry.metrics().encode() {
        tracing::debug!(metrics = %text, "final metrics");
    }
    Ok(())
}
