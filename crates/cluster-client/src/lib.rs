//! Cluster Client
//!
//! Read access to the Deployments of one Kubernetes cluster, reduced to the
//! typed [`ResourceRecord`] the census controller works with.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient};
//! use census_types::ClusterConfig;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = ClusterConfig::new("prod", "/etc/kube/prod.yaml");
//! let client = KubeClusterClient::connect(&cluster, None).await?;
//!
//! // Point lookup
//! let record = client.get("default", "web").await?;
//! println!("{} runs {}", record.key(), record.image_summary());
//!
//! // Change notifications
//! let mut events = client.watch();
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Typed records**: Deployments are converted once, at this boundary
//! - **Relist handling**: objects that vanish across a watch relist are
//!   reported as deletions
//! - **Mocking**: `MockClusterClient` behind the `test-util` feature

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cluster_trait;
mod translate;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use error::ClusterClientError;
pub use models::*;
pub use cluster_trait::ClusterClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockClusterClient;
