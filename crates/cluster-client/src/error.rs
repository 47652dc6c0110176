//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when reading from a cluster
#[derive(Debug, Error)]
pub enum ClusterClientError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig could not be read or resolved
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object could not be converted into a resource record
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Watch stream reported an error
    #[error("Watch error: {0}")]
    Watch(String),
}

impl ClusterClientError {
    /// Whether the error means the resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
