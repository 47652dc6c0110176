//! Controller configuration.
//!
//! All settings come from environment variables:
//!
//! | Variable | Default |
//! |---|---|
//! | `CENSUS_CLUSTERS` | required, `name:kubeconfig,...` |
//! | `CENSUS_OUTPUT_DIR` | `./out` |
//! | `CENSUS_TEMPLATE` | built-in template |
//! | `CENSUS_INTERVAL_SECS` | `10` |
//! | `CENSUS_LISTEN_ADDR` | `127.0.0.1:8082` |
//! | `CENSUS_SYNC_TIMEOUT_SECS` | `60` |
//! | `WATCH_NAMESPACE` | all namespaces |

use crate::error::ControllerError;
use crate::render::{validate_template, DEFAULT_TEMPLATE};
use census_types::{parse_cluster_list, ClusterConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_OUTPUT_DIR: &str = "./out";
const DEFAULT_INTERVAL_SECS: u64 = 10;
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8082";
const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 60;

/// Validated controller settings.
#[derive(Debug, Clone)]
pub struct CensusConfig {
    clusters: Vec<ClusterConfig>,
    output_dir: PathBuf,
    template_path: Option<PathBuf>,
    interval: Duration,
    listen_addr: SocketAddr,
    sync_timeout: Duration,
    namespace: Option<String>,
}

fn parse_secs(var: &str, value: Option<String>, default: u64) -> Result<Duration, ControllerError> {
    let Some(value) = value else {
        return Ok(Duration::from_secs(default));
    };
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ControllerError::InvalidConfig(format!("{var} must be greater than zero"))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ControllerError::InvalidConfig(format!("{var}={value}: {e}"))),
    }
}

impl CensusConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`CensusConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// Fails if `CENSUS_CLUSTERS` is missing or malformed, or any other
    /// variable holds an unusable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let clusters = lookup("CENSUS_CLUSTERS").ok_or_else(|| {
            ControllerError::InvalidConfig("CENSUS_CLUSTERS environment variable is required".to_string())
        })?;
        let clusters = parse_cluster_list(&clusters)?;

        let output_dir = lookup("CENSUS_OUTPUT_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR), PathBuf::from);
        let template_path = lookup("CENSUS_TEMPLATE")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let interval = parse_secs("CENSUS_INTERVAL_SECS", lookup("CENSUS_INTERVAL_SECS"), DEFAULT_INTERVAL_SECS)?;
        let sync_timeout = parse_secs(
            "CENSUS_SYNC_TIMEOUT_SECS",
            lookup("CENSUS_SYNC_TIMEOUT_SECS"),
            DEFAULT_SYNC_TIMEOUT_SECS,
        )?;

        let listen_addr = lookup("CENSUS_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_addr
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("CENSUS_LISTEN_ADDR={listen_addr}: {e}")))?;

        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        Ok(Self {
            clusters,
            output_dir,
            template_path,
            interval,
            listen_addr,
            sync_timeout,
            namespace,
        })
    }

    /// Clusters to watch, in configuration order.
    pub fn clusters(&self) -> &[ClusterConfig] {
        &self.clusters
    }

    /// Directory the artifacts are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Custom template path, if any.
    pub fn template_path(&self) -> Option<&Path> {
        self.template_path.as_deref()
    }

    /// Aggregation interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// HTTP bind address.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// How long each controller may take to sync its cache.
    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    /// Namespace watches are restricted to; `None` means all.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Reads and validates the HTML template.
    ///
    /// # Errors
    ///
    /// Fails if the custom template cannot be read or lacks a placeholder.
    pub fn load_template(&self) -> Result<String, ControllerError> {
        let template = match &self.template_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                ControllerError::Template(format!("cannot read {}: {e}", path.display()))
            })?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        validate_template(&template)?;
        Ok(template)
    }
}
