//! Integration tests for the Kubernetes cluster client
//!
//! These tests require a reachable cluster.
//! Set CENSUS_TEST_KUBECONFIG to a kubeconfig path to run.

use census_types::ClusterConfig;
use cluster_client::{ClusterClientTrait, KubeClusterClient};
use futures::StreamExt;
use std::time::Duration;

fn test_cluster() -> ClusterConfig {
    let path = std::env::var("CENSUS_TEST_KUBECONFIG")
        .expect("CENSUS_TEST_KUBECONFIG environment variable must be set");
    ClusterConfig::new("integration", path)
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_connect() {
    let client = KubeClusterClient::connect(&test_cluster(), None)
        .await
        .expect("Failed to connect");
    assert_eq!(client.cluster_name(), "integration");
    assert!(!client.has_synced());
}

#[tokio::test]
#[ignore]
async fn test_watch_syncs() {
    let client = KubeClusterClient::connect(&test_cluster(), None)
        .await
        .expect("Failed to connect");

    let mut signal = client.sync_signal();
    let mut events = client.watch();
    let drain = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            println!("{:?}", event);
        }
    });

    tokio::time::timeout(Duration::from_secs(30), signal.wait_for(|synced| *synced))
        .await
        .expect("Timed out waiting for the initial listing")
        .expect("Sync signal closed");
    drain.abort();

    assert!(client.has_synced(), "Watch did not complete its initial listing");
}

#[tokio::test]
#[ignore]
async fn test_get_missing_deployment() {
    let client = KubeClusterClient::connect(&test_cluster(), None)
        .await
        .expect("Failed to connect");

    let err = client
        .get("default", "image-census-does-not-exist")
        .await
        .expect_err("Deployment should not exist");
    assert!(err.is_not_found());
}
