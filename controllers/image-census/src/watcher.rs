//! Watch dispatch for one cluster.
//!
//! Feeds the cluster's change notifications into its reconciler and reports
//! when the initial listing has been delivered.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives one cluster's watch stream into its reconciler.
#[derive(Debug, Clone)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    /// Dispatches watch events to the reconciler until cancelled.
    ///
    /// Transient watch errors are logged and the stream continues.
    ///
    /// # Errors
    ///
    /// Fails if the watch stream ends while not cancelled.
    pub async fn dispatch(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let cluster = self.reconciler.cluster_name().to_string();
        info!(cluster = %cluster, "Starting deployment watcher");

        let mut events = self.reconciler.client().watch();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(cluster = %cluster, "Deployment watcher stopped");
                    return Ok(());
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        debug!(cluster = %cluster, kind = ?event.kind(), key = %event.key(), "Watch event");
                        self.reconciler.on_event(event);
                    }
                    Some(Err(e)) => {
                        warn!(cluster = %cluster, error = %e, "Deployment watch error");
                    }
                    None => {
                        return Err(ControllerError::Watch(format!(
                            "Deployment watch for cluster {cluster} ended"
                        )));
                    }
                }
            }
        }
    }

    /// Waits until the client reports its initial listing delivered.
    ///
    /// Returns `Ok(false)` if cancelled first.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::CacheSync` if not synced within `timeout`.
    pub async fn wait_for_sync(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, ControllerError> {
        let cluster = self.reconciler.cluster_name();
        let mut signal = self.reconciler.client().sync_signal();
        let synced = async move { signal.wait_for(|synced| *synced).await.map(|_| ()) };

        tokio::select! {
            () = cancel.cancelled() => Ok(false),
            synced = tokio::time::timeout(timeout, synced) => match synced {
                Ok(Ok(())) => Ok(true),
                Ok(Err(e)) => Err(ControllerError::CacheSync(format!(
                    "cluster {cluster} sync signal closed: {e}"
                ))),
                Err(e) => Err(ControllerError::CacheSync(format!(
                    "cluster {cluster} did not sync within {}s: {e}",
                    timeout.as_secs()
                ))),
            },
        }
    }
}
