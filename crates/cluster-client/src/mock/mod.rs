//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory implementation of `ClusterClientTrait`
//! that can be used in unit tests without a running cluster. Records are
//! stored in memory, watch events are pushed through a channel, and `get`
//! can be configured to fail for specific keys.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterClientError;
use crate::models::{ResourceRecord, WatchEvent};
use census_types::ReconcileKey;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

/// How `get` should fail for a key.
#[derive(Debug, Clone, Copy)]
enum Failure {
    Always,
    Times(u32),
}

/// Mock ClusterClient for testing
#[derive(Clone)]
pub struct MockClusterClient {
    cluster_name: String,
    records: Arc<Mutex<HashMap<ReconcileKey, ResourceRecord>>>,
    failures: Arc<Mutex<HashMap<ReconcileKey, Failure>>>,
    get_calls: Arc<Mutex<HashMap<ReconcileKey, u32>>>,
    events_tx: mpsc::UnboundedSender<WatchEvent>,
    events_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<WatchEvent>>>>,
    synced: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient")
            .field("cluster_name", &self.cluster_name)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockClusterClient {
    /// Create a new mock client for the named cluster.
    ///
    /// The mock reports itself as synced; use [`Self::set_synced`] to change that.
    pub fn new(cluster_name: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (synced, _) = watch::channel(true);
        Self {
            cluster_name: cluster_name.into(),
            records: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            get_calls: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx: Arc::new(Mutex::new(Some(events_rx))),
            synced: Arc::new(synced),
        }
    }

    /// Store a record without emitting an event (for test setup)
    pub fn add_record(&self, record: ResourceRecord) {
        lock(&self.records).insert(record.key(), record);
    }

    /// Store a record and emit `Added` or `Updated` on the watch stream
    pub fn apply(&self, record: ResourceRecord) {
        let previous = lock(&self.records).insert(record.key(), record.clone());
        let event = if previous.is_some() {
            WatchEvent::Updated(record)
        } else {
            WatchEvent::Added(record)
        };
        self.send(event);
    }

    /// Remove a record and emit `Deleted` on the watch stream
    pub fn delete(&self, key: &ReconcileKey) {
        lock(&self.records).remove(key);
        self.send(WatchEvent::Deleted(key.clone()));
    }

    /// Emit an arbitrary event on the watch stream
    pub fn send(&self, event: WatchEvent) {
        // The receiver may already be dropped when a test tears down
        let _ = self.events_tx.send(event);
    }

    /// Make every `get` for `key` fail
    pub fn fail_always(&self, key: &ReconcileKey) {
        lock(&self.failures).insert(key.clone(), Failure::Always);
    }

    /// Make the next `times` calls to `get` for `key` fail
    pub fn fail_times(&self, key: &ReconcileKey, times: u32) {
        lock(&self.failures).insert(key.clone(), Failure::Times(times));
    }

    /// Number of `get` calls made for `key`
    pub fn get_calls(&self, key: &ReconcileKey) -> u32 {
        lock(&self.get_calls).get(key).copied().unwrap_or(0)
    }

    /// Set the value reported by `has_synced` and `sync_signal`
    pub fn set_synced(&self, synced: bool) {
        self.synced.send_replace(synced);
    }

    fn take_failure(&self, key: &ReconcileKey) -> bool {
        let mut failures = lock(&self.failures);
        match failures.get(key).copied() {
            Some(Failure::Always) => true,
            Some(Failure::Times(n)) if n > 0 => {
                failures.insert(key.clone(), Failure::Times(n - 1));
                true
            }
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<ResourceRecord, ClusterClientError> {
        let key = ReconcileKey::new(namespace, name);
        *lock(&self.get_calls).entry(key.clone()).or_insert(0) += 1;

        if self.take_failure(&key) {
            return Err(ClusterClientError::Watch(format!("injected failure for {key}")));
        }

        lock(&self.records)
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterClientError::NotFound(key.to_string()))
    }

    fn watch(&self) -> BoxStream<'static, Result<WatchEvent, ClusterClientError>> {
        // Only the first caller gets the channel; later watches see nothing
        match lock(&self.events_rx).take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (Ok(event), rx))
            })
            .boxed(),
            None => stream::empty().boxed(),
        }
    }

    fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    fn sync_signal(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }
}
