//! ClusterClient trait for mocking
//!
//! This trait abstracts the per-cluster resource cache accessor so the
//! controller can be unit tested against `MockClusterClient`.

use crate::error::ClusterClientError;
use crate::models::{ResourceRecord, WatchEvent};
use futures::stream::BoxStream;
use tokio::sync::watch;

/// Trait for per-cluster resource access
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Name of the cluster this client reads from
    fn cluster_name(&self) -> &str;

    /// Fetch the current state of a resource.
    ///
    /// Returns `ClusterClientError::NotFound` when the resource does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<ResourceRecord, ClusterClientError>;

    /// Stream of change notifications.
    ///
    /// The stream ends only when the underlying source is closed; transient
    /// watch failures are yielded as `Err` items and the stream continues.
    fn watch(&self) -> BoxStream<'static, Result<WatchEvent, ClusterClientError>>;

    /// Whether the initial listing has been fully delivered.
    fn has_synced(&self) -> bool;

    /// Receiver that flips to `true` once the initial listing has been
    /// delivered, and back to `false` when a new watch starts.
    fn sync_signal(&self) -> watch::Receiver<bool>;
}
