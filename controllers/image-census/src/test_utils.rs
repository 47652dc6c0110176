//! Test utilities for unit testing the controller
//!
//! This module provides helpers for creating test data and wiring reconcilers
//! to `MockClusterClient`.

use crate::metrics::CensusMetrics;
use crate::reconciler::Reconciler;
use crate::registry::ServiceRegistry;
use cluster_client::{MockClusterClient, ResourceRecord};
use std::sync::Arc;

/// Helper to create a test deployment record with the given container images
pub fn deployment(namespace: &str, name: &str, images: &[&str]) -> ResourceRecord {
    ResourceRecord::new(namespace, name, images.iter().copied())
}

/// Reconciler for `cluster` backed by a mock client and a fresh registry.
///
/// The returned mock shares state with the one inside the reconciler.
pub fn create_test_reconciler(cluster: &str) -> (Reconciler, MockClusterClient, Arc<ServiceRegistry>) {
    let mock = MockClusterClient::new(cluster);
    let registry = Arc::new(ServiceRegistry::new());
    let metrics = CensusMetrics::new().expect("metrics registry");
    let reconciler = Reconciler::new(Arc::new(mock.clone()), Arc::clone(&registry), metrics);
    (reconciler, mock, registry)
}
