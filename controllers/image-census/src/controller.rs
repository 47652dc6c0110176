//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires one
//! `ClusterController` per configured cluster to the shared service registry,
//! the aggregator and the HTTP server.

use crate::aggregator::{Aggregator, RecordSource};
use crate::cluster::ClusterController;
use crate::config::CensusConfig;
use crate::error::ControllerError;
use crate::metrics::CensusMetrics;
use crate::publisher::ArtifactPaths;
use crate::reconciler::Reconciler;
use crate::registry::ServiceRegistry;
use crate::server::{router, serve, AppState};
use cluster_client::{ClusterClientTrait, KubeClusterClient};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Main controller for the image census.
pub struct Controller {
    config: CensusConfig,
    template: String,
    clients: Vec<Arc<dyn ClusterClientTrait>>,
    metrics: CensusMetrics,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("clusters", &self.clients.len())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Connects to every configured cluster.
    ///
    /// # Errors
    ///
    /// Fails if any kubeconfig is unusable or any API server is unreachable;
    /// no controller is started in that case.
    pub async fn new(config: CensusConfig) -> Result<Self, ControllerError> {
        info!("Initializing Image Census Controller");

        let mut clients: Vec<Arc<dyn ClusterClientTrait>> = Vec::with_capacity(config.clusters().len());
        for cluster in config.clusters() {
            let client = KubeClusterClient::connect(cluster, config.namespace())
                .await
                .inspect_err(|e| error!(cluster = %cluster.name(), error = %e, "Failed to connect to cluster"))?;
            clients.push(Arc::new(client));
        }

        Self::from_clients(config, clients)
    }

    /// Creates a controller over already connected clients.
    ///
    /// # Errors
    ///
    /// Fails if the template is unusable or metrics cannot be registered.
    pub fn from_clients(
        config: CensusConfig,
        clients: Vec<Arc<dyn ClusterClientTrait>>,
    ) -> Result<Self, ControllerError> {
        let template = config.load_template()?;
        let metrics = CensusMetrics::new()?;
        Ok(Self {
            config,
            template,
            clients,
            metrics,
        })
    }

    /// Runs every task until `cancel` fires, then waits for all of them.
    ///
    /// A failing cluster controller is logged and the others keep running.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP listener cannot be bound or the server fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ControllerError::Server(format!("cannot bind {addr}: {e}")))?;

        let registry = Arc::new(ServiceRegistry::new());
        let paths = ArtifactPaths::in_dir(self.config.output_dir());

        let mut sources: Vec<Arc<dyn RecordSource>> = Vec::with_capacity(self.clients.len());
        let mut controllers = Vec::with_capacity(self.clients.len());
        for client in self.clients {
            let reconciler = Arc::new(Reconciler::new(client, Arc::clone(&registry), self.metrics.clone()));
            sources.push(Arc::clone(&reconciler) as Arc<dyn RecordSource>);

            let controller = ClusterController::new(reconciler, self.config.sync_timeout());
            let cancel = cancel.clone();
            controllers.push(tokio::spawn(async move {
                let cluster = controller.cluster_name().to_string();
                match controller.run(cancel).await {
                    Ok(()) => info!(cluster = %cluster, "Cluster controller stopped"),
                    Err(e) => error!(cluster = %cluster, error = %e, "Cluster controller failed"),
                }
            }));
        }

        let aggregator = Aggregator::new(
            sources,
            registry,
            self.template,
            paths.clone(),
            self.config.interval(),
            self.metrics.clone(),
        );
        let aggregator = tokio::spawn(aggregator.run(cancel.clone()));

        let app = router(AppState::new(paths.json, self.metrics));
        let server = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = serve(listener, app, cancel.clone()).await;
                if result.is_err() {
                    cancel.cancel();
                }
                result
            })
        };

        info!(clusters = controllers.len(), "Image Census Controller running");
        cancel.cancelled().await;
        info!("Shutdown requested, waiting for tasks to finish");

        for handle in controllers {
            if let Err(e) = handle.await {
                error!(error = %e, "Cluster controller panicked");
            }
        }
        aggregator
            .await
            .map_err(|e| ControllerError::Watch(format!("Aggregator panicked: {e}")))?;
        server
            .await
            .map_err(|e| ControllerError::Server(format!("HTTP server panicked: {e}")))??;

        info!("Image Census Controller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::deployment;
    use census_types::ClusterInfo;
    use cluster_client::MockClusterClient;
    use std::time::Duration;

    fn config(dir: &tempfile::TempDir, listen_addr: &str) -> CensusConfig {
        let output = dir.path().to_string_lossy().to_string();
        let listen_addr = listen_addr.to_string();
        CensusConfig::from_lookup(move |var| match var {
            "CENSUS_CLUSTERS" => Some("prod:/kube/prod,stage:/kube/stage".to_string()),
            "CENSUS_OUTPUT_DIR" => Some(output.clone()),
            "CENSUS_LISTEN_ADDR" => Some(listen_addr.clone()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_census_across_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let prod = MockClusterClient::new("prod");
        let stage = MockClusterClient::new("stage");
        prod.add_record(deployment("default", "web", &["nginx:1.2"]));
        let controller = Controller::from_clients(
            config(&dir, "127.0.0.1:0"),
            vec![Arc::new(prod.clone()), Arc::new(stage)],
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(controller.run(cancel.clone()));
        prod.apply(deployment("default", "web", &["nginx:1.2"]));

        // Past the warm-up; the first cycle has run
        tokio::time::sleep(Duration::from_secs(2)).await;

        cancel.cancel();
        task.await.unwrap().unwrap();

        let clusters: Vec<ClusterInfo> =
            serde_json::from_slice(&std::fs::read(dir.path().join("census.json")).unwrap()).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].cluster_name, "prod");
        assert_eq!(clusters[0].service_image_pair["web"], "nginx:1.2");
        assert!(clusters[1].service_image_pair.is_empty());

        let html = std::fs::read_to_string(dir.path().join("census.html")).unwrap();
        assert!(html.contains("<td>web</td><td style=\"background-color:#137a00\">nginx:1.2</td><td>No image found</td>"));
    }

    #[tokio::test]
    async fn test_run_fails_when_listener_cannot_bind() {
        let dir = tempfile::tempdir().unwrap();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let controller =
            Controller::from_clients(config(&dir, &addr), vec![Arc::new(MockClusterClient::new("prod"))]).unwrap();

        let result = controller.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(ControllerError::Server(_))));
    }
}
