//! Kubernetes-backed cluster client.
//!
//! Builds a `kube::Client` from a per-cluster kubeconfig file and exposes
//! Deployments through [`ClusterClientTrait`].

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterClientError;
use crate::models::{ResourceRecord, WatchEvent};
use crate::translate::EventTranslator;
use census_types::{ClusterConfig, ReconcileKey};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use kube_runtime::{watcher, WatchStreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Reads Deployments from one cluster.
#[derive(Clone)]
pub struct KubeClusterClient {
    cluster_name: String,
    client: Client,
    deployments: Api<Deployment>,
    synced: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("cluster_name", &self.cluster_name)
            .field("synced", &*self.synced.borrow())
            .finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Connects to a cluster and verifies the API server is reachable.
    ///
    /// `namespace` restricts the watch to one namespace; `None` watches all.
    ///
    /// # Errors
    ///
    /// Fails if the kubeconfig cannot be read or resolved, or the API server
    /// does not answer a version request.
    pub async fn connect(
        cluster: &ClusterConfig,
        namespace: Option<&str>,
    ) -> Result<Self, ClusterClientError> {
        info!(cluster = %cluster.name(), path = %cluster.config_path().display(), "Loading kubeconfig");

        let kubeconfig = Kubeconfig::read_from(cluster.config_path())?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        let client = Client::try_from(config)?;

        // Fail at startup rather than on the first watch
        let version = client.apiserver_version().await?;
        info!(cluster = %cluster.name(), version = %version.git_version, "Connected to API server");

        Ok(Self::from_client(cluster.name(), client, namespace))
    }

    /// Wraps an existing client without probing it.
    #[must_use]
    pub fn from_client(cluster_name: &str, client: Client, namespace: Option<&str>) -> Self {
        let deployments = match namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };

        let (synced, _) = watch::channel(false);
        Self {
            cluster_name: cluster_name.to_string(),
            client,
            deployments,
            synced: Arc::new(synced),
        }
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<ResourceRecord, ClusterClientError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(deployment) => ResourceRecord::try_from(&deployment),
            None => Err(ClusterClientError::NotFound(
                ReconcileKey::new(namespace, name).to_string(),
            )),
        }
    }

    fn watch(&self) -> BoxStream<'static, Result<WatchEvent, ClusterClientError>> {
        debug!(cluster = %self.cluster_name, "Starting Deployment watch");
        self.synced.send_replace(false);

        let mut translator = EventTranslator::new(Arc::clone(&self.synced));
        watcher(self.deployments.clone(), watcher::Config::default())
            .default_backoff()
            .map(move |event| match event {
                Ok(event) => translator.translate(event),
                Err(e) => vec![Err(ClusterClientError::Watch(e.to_string()))],
            })
            .flat_map(stream::iter)
            .boxed()
    }

    fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    fn sync_signal(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }
}
