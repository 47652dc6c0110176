//! Translation of raw kube watcher events into census watch events.
//!
//! `kube_runtime::watcher` reports every observation as `Apply` and replays
//! the full listing on (re)connect without emitting deletions for objects
//! that disappeared while disconnected. The translator tracks the keys it has
//! reported so it can tell additions from updates and synthesize deletions
//! at the end of each relist.

use crate::error::ClusterClientError;
use crate::models::{ResourceRecord, WatchEvent};
use census_types::ReconcileKey;
use k8s_openapi::api::apps::v1::Deployment;
use kube_runtime::watcher;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

pub(crate) struct EventTranslator {
    known: HashSet<ReconcileKey>,
    relisted: Option<HashSet<ReconcileKey>>,
    synced: Arc<watch::Sender<bool>>,
}

impl EventTranslator {
    pub(crate) fn new(synced: Arc<watch::Sender<bool>>) -> Self {
        Self {
            known: HashSet::new(),
            relisted: None,
            synced,
        }
    }

    pub(crate) fn translate(
        &mut self,
        event: watcher::Event<Deployment>,
    ) -> Vec<Result<WatchEvent, ClusterClientError>> {
        match event {
            watcher::Event::Init => {
                debug!("Watch relist started");
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(deployment) => {
                let result = ResourceRecord::try_from(&deployment).map(|record| {
                    if let Some(relisted) = self.relisted.as_mut() {
                        relisted.insert(record.key());
                    }
                    self.observe(record)
                });
                vec![result]
            }
            watcher::Event::InitDone => {
                let relisted = self.relisted.take().unwrap_or_default();
                let vanished: Vec<ReconcileKey> = self
                    .known
                    .iter()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                for key in &vanished {
                    self.known.remove(key);
                }
                self.synced.send_replace(true);
                debug!(vanished = vanished.len(), "Watch relist complete");
                vanished.into_iter().map(|key| Ok(WatchEvent::Deleted(key))).collect()
            }
            watcher::Event::Apply(deployment) => {
                vec![ResourceRecord::try_from(&deployment).map(|record| self.observe(record))]
            }
            watcher::Event::Delete(deployment) => {
                let result = ResourceRecord::try_from(&deployment).map(|record| {
                    let key = record.key();
                    self.known.remove(&key);
                    WatchEvent::Deleted(key)
                });
                vec![result]
            }
        }
    }

    fn observe(&mut self, record: ResourceRecord) -> WatchEvent {
        if self.known.insert(record.key()) {
            WatchEvent::Added(record)
        } else {
            WatchEvent::Updated(record)
        }
    }
}
