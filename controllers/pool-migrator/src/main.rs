//! Pool Migrator
//!
//! Watches ReplicaPool resources and keeps the replication controller of the
//! same name in line with each one. Template changes are rolled out by
//! cross-scaling onto a replacement pool, so the pool never drops below its
//! declared capacity of ready workers.

mod backoff;
mod controller;
mod error;
mod metrics;
mod probes;
mod reconciler;
mod settings;
mod status;
mod watcher;

use controller::Controller;
use settings::Settings;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls connector needs a process-wide crypto provider.
    rustls::crypto::ring::default_provider().install_default().ok();

    info!("Starting Pool Migrator");

    let settings = Settings::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", settings.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Probe address: {}", settings.probe_addr);
    info!(
        "  Poll interval: {:?}, step timeout: {:?}, settle duration: {:?}",
        settings.migration.poll_interval, settings.migration.step_timeout, settings.migration.settle_duration
    );

    let controller = Controller::new(settings).await?;
    controller.run().await?;

    Ok(())
}
