//! Deployment records
//!
//! The derived, per-cluster view of one watched deployment.

use serde::{Deserialize, Serialize};

/// Placeholder shown wherever no image summary is known.
pub const NO_IMAGE_PLACEHOLDER: &str = "No image found";

/// Separator between container images in an image summary.
pub const IMAGE_SEPARATOR: &str = " | ";

/// Derived state of a deployment within one cluster.
///
/// Owned exclusively by the controller for `cluster_name` and keyed there by
/// the deployment name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    /// Cluster that owns the record
    pub cluster_name: String,

    /// Namespace of the deployment
    pub namespace: String,

    /// Container images joined in declaration order
    pub image_summary: String,
}

impl DeploymentRecord {
    /// Record for a deployment that has been seen but not yet reconciled.
    pub fn pending(cluster_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            namespace: namespace.into(),
            image_summary: NO_IMAGE_PLACEHOLDER.to_string(),
        }
    }
}

/// Joins container image references in declaration order.
///
/// `["nginx:1.2", "envoy:1.30"]` becomes `"nginx:1.2 | envoy:1.30"`.
pub fn summarize_images<S: AsRef<str>>(images: &[S]) -> String {
    images
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(IMAGE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_preserves_order() {
        assert_eq!(summarize_images(&["b:2", "a:1"]), "b:2 | a:1");
    }

    #[test]
    fn test_summarize_single_and_empty() {
        assert_eq!(summarize_images(&["nginx:1.2"]), "nginx:1.2");
        assert_eq!(summarize_images::<&str>(&[]), "");
    }

    #[test]
    fn test_pending_record_uses_placeholder() {
        let record = DeploymentRecord::pending("prod", "default");
        assert_eq!(record.image_summary, NO_IMAGE_PLACEHOLDER);
        assert_eq!(record.cluster_name, "prod");
    }
}
