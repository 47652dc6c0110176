//! Prometheus metrics for the census controller.
//!
//! Exposed in text format at `GET /metrics`.

use crate::error::ControllerError;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Handles to every census metric plus the registry they live in.
#[derive(Debug, Clone)]
pub struct CensusMetrics {
    registry: Arc<Registry>,
    /// Reconcile outcomes by cluster and result (`success`, `retry`, `dropped`)
    pub reconciles: IntCounterVec,
    /// Items waiting in each cluster's queue
    pub queue_depth: IntGaugeVec,
    /// Service names currently in the registry
    pub registered_services: IntGauge,
    /// Completed aggregation cycles
    pub aggregation_cycles: IntCounter,
    /// Aggregation cycles skipped because rendering or writing failed
    pub aggregation_failures: IntCounter,
}

impl CensusMetrics {
    /// Creates and registers all metrics in a fresh registry.
    ///
    /// # Errors
    ///
    /// Fails if a metric definition is invalid or registered twice.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new("census_reconciles_total", "Reconcile attempts by outcome"),
            &["cluster", "result"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("census_queue_depth", "Keys waiting in the cluster work queue"),
            &["cluster"],
        )?;
        let registered_services = IntGauge::new(
            "census_registered_services",
            "Service names held by at least one cluster",
        )?;
        let aggregation_cycles = IntCounter::new(
            "census_aggregation_cycles_total",
            "Snapshots rendered and published",
        )?;
        let aggregation_failures = IntCounter::new(
            "census_aggregation_failures_total",
            "Aggregation cycles skipped after an error",
        )?;

        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(registered_services.clone()))?;
        registry.register(Box::new(aggregation_cycles.clone()))?;
        registry.register(Box::new(aggregation_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            reconciles,
            queue_depth,
            registered_services,
            aggregation_cycles,
            aggregation_failures,
        })
    }

    /// Counts one reconcile outcome for a cluster.
    pub fn record_reconcile(&self, cluster: &str, result: &str) {
        self.reconciles.with_label_values(&[cluster, result]).inc();
    }

    /// Sets the queue depth gauge for a cluster.
    pub fn set_queue_depth(&self, cluster: &str, depth: usize) {
        self.queue_depth
            .with_label_values(&[cluster])
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Encodes every metric in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Fails if encoding fails or produces invalid UTF-8.
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Server(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_labels() {
        let metrics = CensusMetrics::new().unwrap();
        metrics.record_reconcile("prod", "success");
        metrics.set_queue_depth("prod", 3);

        let output = metrics.encode().unwrap();
        assert!(output.contains("census_reconciles_total{cluster=\"prod\",result=\"success\"} 1"));
        assert!(output.contains("census_queue_depth{cluster=\"prod\"} 3"));
    }
}
