//! Snapshot documents
//!
//! `ClusterInfo` is the per-cluster entry of the JSON document published
//! every aggregation cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Date format used in published snapshots, e.g. `2026-October-19`.
pub const SNAPSHOT_DATE_FORMAT: &str = "%Y-%B-%d";

/// Formats a timestamp the way snapshot documents carry it.
#[must_use]
pub fn format_snapshot_date(at: DateTime<Utc>) -> String {
    at.format(SNAPSHOT_DATE_FORMAT).to_string()
}

/// Service to image mapping of one cluster at one point in time.
///
/// Always rebuilt from scratch; never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// Cluster name
    pub cluster_name: String,

    /// Service name to image summary
    pub service_image_pair: BTreeMap<String, String>,

    /// Generation date
    pub date: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_date_format() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        assert_eq!(format_snapshot_date(at), "2026-October-19");
    }

    #[test]
    fn test_cluster_info_json_field_names() {
        let info = ClusterInfo {
            cluster_name: "prod".to_string(),
            service_image_pair: BTreeMap::from([("web".to_string(), "nginx:1.2".to_string())]),
            date: "2026-October-19".to_string(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "clusterName": "prod",
                "serviceImagePair": { "web": "nginx:1.2" },
                "date": "2026-October-19"
            })
        );
    }
}
