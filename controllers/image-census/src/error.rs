//! Controller-specific error types.
//!
//! This module defines error types specific to the Image Census Controller
//! that are not covered by upstream library errors.

use census_types::ClusterListError;
use cluster_client::ClusterClientError;
use thiserror::Error;

/// Errors that can occur in the Image Census Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster access error
    #[error("Cluster client error: {0}")]
    Client(#[from] ClusterClientError),

    /// Cluster list could not be parsed
    #[error("Invalid cluster list: {0}")]
    ClusterList(#[from] ClusterListError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Informer cache did not sync in time
    #[error("Cache sync failed: {0}")]
    CacheSync(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Snapshot artifact could not be read or written
    #[error("Artifact I/O error: {0}")]
    Artifact(#[from] std::io::Error),

    /// Snapshot could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTML template is unusable
    #[error("Template error: {0}")]
    Template(String),

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// HTTP server failed
    #[error("HTTP server error: {0}")]
    Server(String),
}
