//! Cluster configuration
//!
//! A cluster is identified by a unique, non-empty name and the kubeconfig
//! file used to reach it. The list is supplied as `name:path` pairs joined
//! by commas, e.g. `prod:/etc/kube/prod.yaml,stage:/etc/kube/stage.yaml`.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while parsing the cluster list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterListError {
    /// The list contained no cluster entries
    #[error("cluster list is empty")]
    Empty,

    /// An entry was not of the form `name:path`
    #[error("malformed cluster entry {0:?}, expected name:configPath")]
    Malformed(String),

    /// An entry had an empty name
    #[error("cluster entry {0:?} has an empty name")]
    EmptyName(String),

    /// An entry had an empty kubeconfig path
    #[error("cluster {0:?} has an empty config path")]
    EmptyPath(String),

    /// Two entries used the same name (names are case sensitive)
    #[error("cluster names must be unique, {0:?} is specified more than once")]
    DuplicateName(String),
}

/// Connection settings for one remote cluster.
///
/// Created once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    name: String,
    config_path: PathBuf,
}

impl ClusterConfig {
    /// Creates a cluster config.
    pub fn new(name: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            config_path: config_path.into(),
        }
    }

    /// Unique cluster name, used as the column header in rendered snapshots.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path to the kubeconfig file for this cluster.
    #[must_use]
    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }
}

impl fmt::Display for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.config_path.display())
    }
}

/// Parses a comma-separated list of `name:configPath` pairs.
///
/// Each entry is split on its first `:` so config paths may themselves
/// contain colons. Whitespace around entries, names and paths is ignored.
/// Any malformed, empty or duplicate entry rejects the whole list; nothing
/// is returned partially.
///
/// # Errors
///
/// Returns a [`ClusterListError`] describing the first offending entry.
pub fn parse_cluster_list(input: &str) -> Result<Vec<ClusterConfig>, ClusterListError> {
    if input.trim().is_empty() {
        return Err(ClusterListError::Empty);
    }

    let mut seen = HashSet::new();
    let mut clusters = Vec::new();

    for entry in input.split(',') {
        let entry = entry.trim();
        let (name, path) = entry
            .split_once(':')
            .ok_or_else(|| ClusterListError::Malformed(entry.to_string()))?;
        let (name, path) = (name.trim(), path.trim());

        if name.is_empty() {
            return Err(ClusterListError::EmptyName(entry.to_string()));
        }
        if path.is_empty() {
            return Err(ClusterListError::EmptyPath(name.to_string()));
        }
        if !seen.insert(name.to_string()) {
            return Err(ClusterListError::DuplicateName(name.to_string()));
        }

        clusters.push(ClusterConfig::new(name, path));
    }

    Ok(clusters)
}
