//! Image Census Controller
//!
//! Watches the Deployments of several Kubernetes clusters and publishes a
//! cross-cluster census of which image each service runs where:
//! - one controller per cluster keeps a local record of every Deployment
//! - a shared registry tracks which service names exist anywhere
//! - an aggregator periodically renders an HTML table and a JSON document,
//!   the latter also served over HTTP

mod aggregator;
mod backoff;
mod cluster;
mod config;
mod controller;
mod error;
mod metrics;
mod publisher;
mod queue;
mod reconciler;
mod registry;
mod render;
mod server;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::CensusConfig;
use crate::error::ControllerError;
use controller::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Configure rustls crypto provider (required for kube-rs with rustls-tls)
    // Ignore error if already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Image Census Controller");

    // Load configuration from environment variables
    let config = CensusConfig::from_env()?;

    info!("Configuration:");
    for cluster in config.clusters() {
        info!("  Cluster: {} ({})", cluster.name(), cluster.config_path().display());
    }
    info!("  Output directory: {}", config.output_dir().display());
    info!(
        "  Template: {}",
        config
            .template_path()
            .map_or_else(|| "built-in".to_string(), |p| p.display().to_string())
    );
    info!("  Interval: {}s", config.interval().as_secs());
    info!("  Listen address: {}", config.listen_addr());
    info!("  Namespace: {}", config.namespace().unwrap_or("all namespaces"));

    // Every cluster must be reachable before anything starts
    let controller = Controller::new(config).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));
    controller.run(cancel).await?;

    Ok(())
}

/// Cancels `cancel` on Ctrl-C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C"),
        () = terminate => info!("Received SIGTERM"),
    }
    cancel.cancel();
}
