//! Typed resource records and watch events

use crate::error::ClusterClientError;
use census_types::{summarize_images, ReconcileKey};
use k8s_openapi::api::apps::v1::Deployment;
use serde::{Deserialize, Serialize};

/// Namespace assumed when an object carries none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A watched Deployment reduced to what the census needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Deployment namespace
    pub namespace: String,

    /// Deployment name
    pub name: String,

    /// Container images in declaration order
    pub images: Vec<String>,
}

impl ResourceRecord {
    /// Creates a record.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        images: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            images: images.into_iter().map(Into::into).collect(),
        }
    }

    /// Key of this record.
    #[must_use]
    pub fn key(&self) -> ReconcileKey {
        ReconcileKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Container images joined in declaration order.
    #[must_use]
    pub fn image_summary(&self) -> String {
        summarize_images(&self.images)
    }
}

impl TryFrom<&Deployment> for ResourceRecord {
    type Error = ClusterClientError;

    fn try_from(deployment: &Deployment) -> Result<Self, Self::Error> {
        let name = deployment
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterClientError::InvalidResource("Deployment missing name".to_string()))?;
        let namespace = deployment
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        // Containers without an image are skipped rather than rendered empty
        let images = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .map(|pod| {
                pod.containers
                    .iter()
                    .filter_map(|c| c.image.clone())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            namespace,
            name,
            images,
        })
    }
}

/// Kind of change reported by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// First time the object is seen
    Added,
    /// A known object changed
    Updated,
    /// The object is gone
    Deleted,
}

/// A change notification for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Object observed for the first time
    Added(ResourceRecord),
    /// Known object observed again
    Updated(ResourceRecord),
    /// Object removed
    Deleted(ReconcileKey),
}

impl WatchEvent {
    /// Kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added(_) => EventKind::Added,
            Self::Updated(_) => EventKind::Updated,
            Self::Deleted(_) => EventKind::Deleted,
        }
    }

    /// Key of the affected resource.
    #[must_use]
    pub fn key(&self) -> ReconcileKey {
        match self {
            Self::Added(record) | Self::Updated(record) => record.key(),
            Self::Deleted(key) => key.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    /// Helper to create a test Deployment with the given container images
    pub fn deployment(namespace: &str, name: &str, images: &[&str]) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: images
                            .iter()
                            .enumerate()
                            .map(|(i, image)| Container {
                                name: format!("c{i}"),
                                image: Some((*image).to_string()),
                                ..Default::default()
                            })
                            .collect(),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::deployment;
    use super::*;

    #[test]
    fn test_record_from_deployment() {
        let record = ResourceRecord::try_from(&deployment("shop", "web", &["nginx:1.2", "envoy:1.30"])).unwrap();
        assert_eq!(record.key(), ReconcileKey::new("shop", "web"));
        assert_eq!(record.image_summary(), "nginx:1.2 | envoy:1.30");
    }

    #[test]
    fn test_record_without_name_is_invalid() {
        let mut d = deployment("shop", "web", &["nginx:1.2"]);
        d.metadata.name = None;
        assert!(matches!(
            ResourceRecord::try_from(&d),
            Err(ClusterClientError::InvalidResource(_))
        ));
    }

    #[test]
    fn test_record_without_spec_has_no_images() {
        let mut d = deployment("shop", "web", &[]);
        d.spec = None;
        d.metadata.namespace = None;
        let record = ResourceRecord::try_from(&d).unwrap();
        assert_eq!(record.namespace, DEFAULT_NAMESPACE);
        assert!(record.images.is_empty());
    }

    #[test]
    fn test_event_kind_and_key() {
        let record = ResourceRecord::new("default", "web", ["nginx:1.2"]);
        assert_eq!(WatchEvent::Added(record.clone()).kind(), EventKind::Added);
        assert_eq!(WatchEvent::Updated(record.clone()).kind(), EventKind::Updated);
        let deleted = WatchEvent::Deleted(record.key());
        assert_eq!(deleted.kind(), EventKind::Deleted);
        assert_eq!(deleted.key(), ReconcileKey::new("default", "web"));
    }
}
