//! Cross-cluster aggregation.
//!
//! On every tick the aggregator copies each controller's records and the
//! registry's service names into a [`CensusSnapshot`], renders it and
//! publishes the artifacts. Live controller state is only read through
//! [`RecordSource::snapshot`].

use crate::error::ControllerError;
use crate::metrics::CensusMetrics;
use crate::publisher::{publish, ArtifactPaths};
use crate::registry::ServiceRegistry;
use crate::render::render;
use census_types::{format_snapshot_date, ClusterInfo, DeploymentRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Delay before the first aggregation, giving controllers time to list.
pub const WARM_UP_DELAY: Duration = Duration::from_secs(1);

/// Read access to one cluster's deployment records.
pub trait RecordSource: Send + Sync {
    /// Cluster the records belong to
    fn cluster_name(&self) -> &str;

    /// Copy of the records, keyed by deployment name
    fn snapshot(&self) -> BTreeMap<String, DeploymentRecord>;
}

/// Point-in-time view of every cluster, rebuilt from scratch each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CensusSnapshot {
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,
    /// One entry per cluster, sorted by cluster name
    pub clusters: Vec<ClusterInfo>,
    /// Registered service names, sorted
    pub services: Vec<String>,
}

impl CensusSnapshot {
    /// Cluster names in column order.
    pub fn cluster_names(&self) -> impl Iterator<Item = &str> {
        self.clusters.iter().map(|c| c.cluster_name.as_str())
    }

    /// Image summary of `service` in `cluster`, if that cluster holds it.
    pub fn cell(&self, service: &str, cluster: &str) -> Option<&str> {
        self.clusters
            .iter()
            .find(|c| c.cluster_name == cluster)
            .and_then(|c| c.service_image_pair.get(service))
            .map(String::as_str)
    }
}

/// Builds a snapshot from every source and the registry.
pub fn tick(sources: &[Arc<dyn RecordSource>], registry: &ServiceRegistry, now: DateTime<Utc>) -> CensusSnapshot {
    let date = format_snapshot_date(now);
    let mut clusters: Vec<ClusterInfo> = sources
        .iter()
        .map(|source| ClusterInfo {
            cluster_name: source.cluster_name().to_string(),
            service_image_pair: source
                .snapshot()
                .into_iter()
                .map(|(name, record)| (name, record.image_summary))
                .collect(),
            date: date.clone(),
        })
        .collect();
    clusters.sort_by(|a, b| a.cluster_name.cmp(&b.cluster_name));

    CensusSnapshot {
        generated_at: now,
        clusters,
        services: registry.snapshot().into_iter().collect(),
    }
}

/// Periodic snapshot renderer and publisher.
pub struct Aggregator {
    sources: Vec<Arc<dyn RecordSource>>,
    registry: Arc<ServiceRegistry>,
    template: String,
    paths: ArtifactPaths,
    interval: Duration,
    metrics: CensusMetrics,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("sources", &self.sources.len())
            .field("paths", &self.paths)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Creates an aggregator that first runs after [`WARM_UP_DELAY`].
    pub fn new(
        sources: Vec<Arc<dyn RecordSource>>,
        registry: Arc<ServiceRegistry>,
        template: String,
        paths: ArtifactPaths,
        interval: Duration,
        metrics: CensusMetrics,
    ) -> Self {
        Self {
            sources,
            registry,
            template,
            paths,
            interval,
            metrics,
        }
    }

    /// Runs one aggregation: snapshot, render, publish.
    ///
    /// Blocks on file I/O; [`Aggregator::run`] calls it off the async runtime.
    ///
    /// # Errors
    ///
    /// Fails if rendering or writing either artifact fails; the previous
    /// artifacts are then left in place.
    pub fn cycle(&self, now: DateTime<Utc>) -> Result<CensusSnapshot, ControllerError> {
        let snapshot = tick(&self.sources, &self.registry, now);
        let (html, json) = render(&snapshot, &self.template)?;
        publish(&self.paths, &html, &json)?;

        self.metrics
            .registered_services
            .set(i64::try_from(self.registry.len()).unwrap_or(i64::MAX));
        self.metrics.aggregation_cycles.inc();
        Ok(snapshot)
    }

    /// Aggregates every interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            html = %self.paths.html.display(),
            json = %self.paths.json.display(),
            "Starting aggregator"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + WARM_UP_DELAY, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let this = Arc::new(self);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            let cycle = {
                let this = Arc::clone(&this);
                tokio::task::spawn_blocking(move || this.cycle(Utc::now()))
            };
            match cycle.await {
                Ok(Ok(snapshot)) => debug!(
                    clusters = snapshot.clusters.len(),
                    services = snapshot.services.len(),
                    "Census snapshot published"
                ),
                Ok(Err(e)) => {
                    this.metrics.aggregation_failures.inc();
                    error!(error = %e, "Aggregation failed, retrying next interval");
                }
                Err(e) => {
                    this.metrics.aggregation_failures.inc();
                    error!(error = %e, "Aggregation task panicked, retrying next interval");
                }
            }
        }

        info!("Shutting down aggregator");
    }
}
