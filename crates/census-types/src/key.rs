//! Reconcile keys
//!
//! A `ReconcileKey` identifies a changed resource by namespace and name.
//! It is the work queue item and the cache lookup key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace and name of a watched resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReconcileKey {
    /// Resource namespace
    pub namespace: String,

    /// Resource name
    pub name: String,
}

impl ReconcileKey {
    /// Creates a key from a namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_namespace_slash_name() {
        assert_eq!(ReconcileKey::new("default", "web").to_string(), "default/web");
    }
}
