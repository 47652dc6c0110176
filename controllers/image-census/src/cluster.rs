//! Per-cluster controller lifecycle.
//!
//! Starts the watch dispatch, waits for the initial listing, then runs the
//! single queue worker until cancellation.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Controller for a single cluster.
#[derive(Debug)]
pub struct ClusterController {
    reconciler: Arc<Reconciler>,
    sync_timeout: Duration,
}

fn joined(
    cluster: &str,
    task: &str,
    result: Result<Result<(), ControllerError>, JoinError>,
) -> Result<(), ControllerError> {
    result.map_err(|e| ControllerError::Watch(format!("{task} for cluster {cluster} panicked: {e}")))?
}

impl ClusterController {
    /// Creates a controller around a reconciler.
    pub fn new(reconciler: Arc<Reconciler>, sync_timeout: Duration) -> Self {
        Self {
            reconciler,
            sync_timeout,
        }
    }

    /// Name of the controlled cluster.
    pub fn cluster_name(&self) -> &str {
        self.reconciler.cluster_name()
    }

    /// Runs until `cancel` fires or the watch fails.
    ///
    /// The worker finishes the item it is processing before this returns.
    ///
    /// # Errors
    ///
    /// Fails if the cache does not sync within the timeout, or the watch
    /// stream ends. Other clusters are unaffected.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let cluster = self.cluster_name().to_string();
        info!(cluster = %cluster, "Starting cluster controller");

        let watcher = Watcher::new(Arc::clone(&self.reconciler));
        let dispatch_cancel = cancel.child_token();
        let mut dispatch = {
            let watcher = watcher.clone();
            let cancel = dispatch_cancel.clone();
            tokio::spawn(async move { watcher.dispatch(cancel).await })
        };

        info!(cluster = %cluster, "Waiting for informer caches to sync");
        let synced = tokio::select! {
            synced = watcher.wait_for_sync(self.sync_timeout, &cancel) => synced,
            result = &mut dispatch => {
                // Dispatch only returns early on cancellation or a dead stream
                self.reconciler.shut_down();
                return joined(&cluster, "Watch dispatch", result);
            }
        };
        match synced {
            Ok(true) => {}
            Ok(false) => {
                dispatch_cancel.cancel();
                self.reconciler.shut_down();
                return joined(&cluster, "Watch dispatch", dispatch.await);
            }
            Err(e) => {
                dispatch_cancel.cancel();
                self.reconciler.shut_down();
                if let Err(dispatch_err) = joined(&cluster, "Watch dispatch", dispatch.await) {
                    warn!(cluster = %cluster, error = %dispatch_err, "Watch dispatch failed during shutdown");
                }
                return Err(e);
            }
        }

        info!(cluster = %cluster, "Caches synced, starting worker");
        let worker = {
            let reconciler = Arc::clone(&self.reconciler);
            tokio::spawn(async move {
                reconciler.run_worker().await;
                Ok(())
            })
        };

        let (outcome, dispatch_done) = tokio::select! {
            () = cancel.cancelled() => (Ok(()), false),
            result = &mut dispatch => (joined(&cluster, "Watch dispatch", result), true),
        };

        info!(cluster = %cluster, "Shutting down cluster controller");
        dispatch_cancel.cancel();
        self.reconciler.shut_down();

        if !dispatch_done {
            if let Err(e) = joined(&cluster, "Watch dispatch", dispatch.await) {
                warn!(cluster = %cluster, error = %e, "Watch dispatch failed during shutdown");
            }
        }
        joined(&cluster, "Worker", worker.await)?;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_reconciler, deployment};

    #[tokio::test]
    async fn test_run_reconciles_until_cancelled() {
        let (reconciler, mock, _registry) = create_test_reconciler("prod");
        mock.add_record(deployment("default", "web", &["nginx:1.2"]));
        let reconciler = Arc::new(reconciler);
        let controller = ClusterController::new(Arc::clone(&reconciler), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(controller.run(cancel.clone()));
        mock.apply(deployment("default", "web", &["nginx:1.2"]));

        while reconciler
            .snapshot()
            .get("web")
            .is_none_or(|record| record.image_summary != "nginx:1.2")
        {
            tokio::task::yield_now().await;
        }

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fails_when_cache_never_syncs() {
        let (reconciler, mock, _registry) = create_test_reconciler("prod");
        mock.set_synced(false);
        let controller = ClusterController::new(Arc::new(reconciler), Duration::from_secs(2));

        let result = controller.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(ControllerError::CacheSync(_))));
    }

    #[tokio::test]
    async fn test_sibling_failure_does_not_stop_healthy_cluster() {
        let (healthy, healthy_mock, _) = create_test_reconciler("prod");
        let (broken, broken_mock, _) = create_test_reconciler("stage");
        broken_mock.set_synced(false);
        let healthy = Arc::new(healthy);
        let cancel = CancellationToken::new();

        let broken_task = tokio::spawn(
            ClusterController::new(Arc::new(broken), Duration::from_millis(200)).run(cancel.clone()),
        );
        let healthy_task = tokio::spawn(
            ClusterController::new(Arc::clone(&healthy), Duration::from_secs(5)).run(cancel.clone()),
        );

        assert!(broken_task.await.unwrap().is_err());

        healthy_mock.add_record(deployment("default", "web", &["nginx:1.2"]));
        healthy_mock.apply(deployment("default", "web", &["nginx:1.2"]));
        while healthy
            .snapshot()
            .get("web")
            .is_none_or(|record| record.image_summary != "nginx:1.2")
        {
            tokio::task::yield_now().await;
        }

        cancel.cancel();
        assert!(healthy_task.await.unwrap().is_ok());
    }
}
