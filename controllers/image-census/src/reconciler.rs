//! Per-cluster reconciliation logic.
//!
//! A `Reconciler` owns everything one cluster controller mutates: the work
//! queue, and the map of deployment records keyed by deployment name. Watch
//! events arrive through [`Reconciler::on_event`]; the single worker drains
//! the queue through [`Reconciler::process_next_work_item`].
//!
//! Records are keyed by name only, so two namespaces holding a deployment of
//! the same name share one slot. The namespace seen first owns the slot until
//! its deployment is deleted; the other namespaces are remembered as shadowed
//! and the first of them takes the slot over when the holder goes away.

use crate::aggregator::RecordSource;
use crate::error::ControllerError;
use crate::metrics::CensusMetrics;
use crate::queue::WorkQueue;
use crate::registry::ServiceRegistry;
use census_types::{DeploymentRecord, ReconcileKey};
use cluster_client::{ClusterClientTrait, ResourceRecord, WatchEvent};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Requeues allowed after a failed reconcile before the key is dropped.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
struct CacheEntry {
    record: DeploymentRecord,
    /// Image summary carried by the most recent event or fetch; `None` right
    /// after a takeover
    observed: Option<String>,
    /// Other namespaces holding a deployment of the same name
    shadowed: BTreeSet<String>,
}

impl CacheEntry {
    fn pending(cluster_name: &str, namespace: &str, observed: String) -> Self {
        Self {
            record: DeploymentRecord::pending(cluster_name, namespace),
            observed: Some(observed),
            shadowed: BTreeSet::new(),
        }
    }
}

/// What a Delete event did to the record map.
enum Removal {
    Untracked,
    Unshadowed,
    Removed,
    TakenOver(ReconcileKey),
}

/// Reconciles the deployments of one cluster into its local record map.
pub struct Reconciler {
    cluster_name: String,
    client: Arc<dyn ClusterClientTrait>,
    registry: Arc<ServiceRegistry>,
    queue: WorkQueue<ReconcileKey>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    metrics: CensusMetrics,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cluster_name", &self.cluster_name)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler with an empty record map and the default rate limiter.
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        registry: Arc<ServiceRegistry>,
        metrics: CensusMetrics,
    ) -> Self {
        Self::with_queue(client, registry, metrics, WorkQueue::with_default_rate_limiter())
    }

    /// Creates a reconciler around an existing queue.
    pub fn with_queue(
        client: Arc<dyn ClusterClientTrait>,
        registry: Arc<ServiceRegistry>,
        metrics: CensusMetrics,
        queue: WorkQueue<ReconcileKey>,
    ) -> Self {
        Self {
            cluster_name: client.cluster_name().to_string(),
            client,
            registry,
            queue,
            cache: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Name of the cluster this reconciler serves.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Client for this reconciler's cluster.
    pub fn client(&self) -> Arc<dyn ClusterClientTrait> {
        Arc::clone(&self.client)
    }

    fn cache(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one watch event to the local state.
    pub fn on_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Added(resource) | WatchEvent::Updated(resource) => self.observe(&resource),
            WatchEvent::Deleted(key) => self.forget_resource(&key),
        }
    }

    fn observe(&self, resource: &ResourceRecord) {
        let key = resource.key();
        let observed = resource.image_summary();

        let mut cache = self.cache_mut();
        let first_sight = match cache.get_mut(&key.name) {
            None => {
                cache.insert(
                    key.name.clone(),
                    CacheEntry::pending(&self.cluster_name, &key.namespace, observed),
                );
                true
            }
            Some(entry) if entry.record.namespace != key.namespace => {
                if entry.shadowed.insert(key.namespace.clone()) {
                    debug!(
                        cluster = %self.cluster_name,
                        key = %key,
                        holder = %entry.record.namespace,
                        "Deployment name already held by another namespace, shadowing"
                    );
                }
                return;
            }
            Some(entry) if entry.observed.as_deref() != Some(observed.as_str()) => {
                entry.observed = Some(observed);
                false
            }
            Some(_) => {
                debug!(cluster = %self.cluster_name, key = %key, "Deployment unchanged");
                return;
            }
        };
        drop(cache);

        if first_sight {
            self.registry.increment(&key.name);
        }
        debug!(cluster = %self.cluster_name, key = %key, "Enqueuing deployment");
        self.queue.add(key);
        self.metrics.set_queue_depth(&self.cluster_name, self.queue.len());
    }

    fn forget_resource(&self, key: &ReconcileKey) {
        let mut cache = self.cache_mut();
        let removal = match cache.get_mut(&key.name) {
            Some(entry) if entry.record.namespace == key.namespace => match entry.shadowed.pop_first() {
                Some(namespace) => {
                    entry.record = DeploymentRecord::pending(&self.cluster_name, &namespace);
                    entry.observed = None;
                    Removal::TakenOver(ReconcileKey::new(namespace, key.name.clone()))
                }
                None => Removal::Removed,
            },
            Some(entry) if entry.shadowed.contains(&key.namespace) => {
                entry.shadowed.remove(&key.namespace);
                Removal::Unshadowed
            }
            _ => Removal::Untracked,
        };
        if matches!(removal, Removal::Removed) {
            cache.remove(&key.name);
        }
        drop(cache);

        match removal {
            Removal::Removed => {
                self.registry.decrement(&key.name);
                self.queue.forget(key);
                info!(cluster = %self.cluster_name, key = %key, "Deployment removed");
            }
            Removal::TakenOver(next) => {
                // The name stays held in this cluster, so the refcount is unchanged
                self.queue.forget(key);
                info!(
                    cluster = %self.cluster_name,
                    key = %key,
                    holder = %next,
                    "Deployment removed, name taken over by another namespace"
                );
                self.queue.add(next);
                self.metrics.set_queue_depth(&self.cluster_name, self.queue.len());
            }
            Removal::Unshadowed => {
                debug!(cluster = %self.cluster_name, key = %key, "Shadowed deployment removed");
            }
            Removal::Untracked => {
                debug!(cluster = %self.cluster_name, key = %key, "Delete for untracked deployment");
            }
        }
    }

    fn holds(&self, key: &ReconcileKey) -> bool {
        self.cache()
            .get(&key.name)
            .is_some_and(|entry| entry.record.namespace == key.namespace)
    }

    /// Fetches the current state of `key` and overwrites its record.
    ///
    /// A key whose record was removed while it waited in the queue is
    /// skipped, and a deployment that no longer exists is left to its
    /// pending Delete event.
    ///
    /// # Errors
    ///
    /// Returns the client error when the fetch fails for any other reason.
    pub async fn reconcile(&self, key: &ReconcileKey) -> Result<(), ControllerError> {
        if !self.holds(key) {
            debug!(cluster = %self.cluster_name, key = %key, "Deployment no longer tracked, skipping");
            return Ok(());
        }

        let resource = match self.client.get(&key.namespace, &key.name).await {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => {
                debug!(cluster = %self.cluster_name, key = %key, "Deployment not found, awaiting delete");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let summary = resource.image_summary();

        // The record may have been deleted while the fetch was in flight
        let mut cache = self.cache_mut();
        match cache.get_mut(&key.name) {
            Some(entry) if entry.record.namespace == key.namespace => {
                entry.observed = Some(summary.clone());
                entry.record.image_summary = summary;
                debug!(
                    cluster = %self.cluster_name,
                    key = %key,
                    images = %entry.record.image_summary,
                    "Deployment reconciled"
                );
            }
            _ => {
                debug!(cluster = %self.cluster_name, key = %key, "Deployment removed during reconcile");
            }
        }
        Ok(())
    }

    /// Takes one key off the queue and reconciles it.
    ///
    /// Returns `false` once the queue has shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = self.reconcile(&key).await;
        self.handle_result(&key, result);
        self.queue.done(&key);
        self.metrics.set_queue_depth(&self.cluster_name, self.queue.len());
        true
    }

    fn handle_result(&self, key: &ReconcileKey, result: Result<(), ControllerError>) {
        match result {
            Ok(()) => {
                self.queue.forget(key);
                self.metrics.record_reconcile(&self.cluster_name, "success");
            }
            Err(e) if self.queue.num_requeues(key) < MAX_RETRIES => {
                warn!(
                    cluster = %self.cluster_name,
                    key = %key,
                    error = %e,
                    "Reconcile failed, requeuing"
                );
                self.queue.add_rate_limited(key.clone());
                self.metrics.record_reconcile(&self.cluster_name, "retry");
            }
            Err(e) => {
                self.queue.forget(key);
                error!(
                    cluster = %self.cluster_name,
                    key = %key,
                    error = %e,
                    retries = MAX_RETRIES,
                    "Dropping deployment out of the queue after repeated failures"
                );
                self.metrics.record_reconcile(&self.cluster_name, "dropped");
            }
        }
    }

    /// Processes queue items until the queue shuts down.
    pub async fn run_worker(&self) {
        while self.process_next_work_item().await {}
        debug!(cluster = %self.cluster_name, "Worker stopped");
    }

    /// Stops the queue; the worker exits after its current item.
    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    /// Copy of the record map, keyed by deployment name.
    pub fn snapshot(&self) -> BTreeMap<String, DeploymentRecord> {
        self.cache()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.record.clone()))
            .collect()
    }
}

impl RecordSource for Reconciler {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn snapshot(&self) -> BTreeMap<String, DeploymentRecord> {
        Reconciler::snapshot(self)
    }
}
