//! Snapshot rendering.
//!
//! Turns a [`CensusSnapshot`] into the HTML page and the JSON document that
//! are published every cycle.

use crate::aggregator::CensusSnapshot;
use crate::error::ControllerError;
use census_types::{format_snapshot_date, NO_IMAGE_PLACEHOLDER};
use std::fmt::Write as _;

/// Template used when no custom template is configured.
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/census.html");

const DATE_PLACEHOLDER: &str = "__DATE__";
const CLUSTER_NAMES_PLACEHOLDER: &str = "__CLUSTER_NAMES__";
const VERSIONS_PLACEHOLDER: &str = "__VERSIONS__";

/// Placeholders every template must contain.
const REQUIRED_PLACEHOLDERS: [&str; 2] = [CLUSTER_NAMES_PLACEHOLDER, VERSIONS_PLACEHOLDER];

/// Background color for an image summary, as six lowercase hex digits.
///
/// Deterministic: equal summaries always share a color, so drift between
/// clusters stands out in the table.
#[must_use]
pub fn image_color(summary: &str) -> String {
    let total: u64 = summary
        .bytes()
        .enumerate()
        .map(|(i, b)| u64::from(b).wrapping_mul(2 * i as u64))
        .fold(0, u64::wrapping_add);

    let total = if total % 2 == 0 {
        total.wrapping_add(128)
    } else {
        total.abs_diff(128)
    };

    let mut hex = format!("{total:x}");
    if hex.len() < 6 {
        hex.extend(std::iter::repeat_n('0', 6 - hex.len()));
    } else {
        hex.truncate(6);
    }
    hex
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Checks that a template carries the placeholders rendering fills in.
///
/// # Errors
///
/// Returns `ControllerError::Template` naming the first missing placeholder.
pub fn validate_template(template: &str) -> Result<(), ControllerError> {
    match REQUIRED_PLACEHOLDERS.iter().find(|p| !template.contains(*p)) {
        Some(missing) => Err(ControllerError::Template(format!(
            "template is missing the {missing} placeholder"
        ))),
        None => Ok(()),
    }
}

/// Renders the HTML table: one column per cluster, one row per service.
#[must_use]
pub fn render_html(snapshot: &CensusSnapshot, template: &str) -> String {
    let mut clusters = String::new();
    for cluster in snapshot.cluster_names() {
        let _ = write!(clusters, "<td>{}</td>", escape_html(cluster));
    }

    let mut rows = String::new();
    for service in &snapshot.services {
        rows.push_str("<tr>");
        let _ = write!(rows, "<td>{}</td>", escape_html(service));
        for cluster in snapshot.cluster_names() {
            match snapshot.cell(service, cluster) {
                Some(summary) if summary != NO_IMAGE_PLACEHOLDER => {
                    let _ = write!(
                        rows,
                        "<td style=\"background-color:#{}\">{}</td>",
                        image_color(summary),
                        escape_html(summary)
                    );
                }
                _ => {
                    let _ = write!(rows, "<td>{NO_IMAGE_PLACEHOLDER}</td>");
                }
            }
        }
        rows.push_str("</tr>");
    }

    template
        .replacen(DATE_PLACEHOLDER, &format_snapshot_date(snapshot.generated_at), 1)
        .replacen(CLUSTER_NAMES_PLACEHOLDER, &clusters, 1)
        .replacen(VERSIONS_PLACEHOLDER, &rows, 1)
}

/// Renders the JSON array of per-cluster documents.
///
/// # Errors
///
/// Fails only if serialization fails.
pub fn render_json(snapshot: &CensusSnapshot) -> Result<Vec<u8>, ControllerError> {
    Ok(serde_json::to_vec(&snapshot.clusters)?)
}

/// Renders both artifacts: `(html, json)`.
///
/// # Errors
///
/// Fails if the template is unusable or serialization fails.
pub fn render(snapshot: &CensusSnapshot, template: &str) -> Result<(Vec<u8>, Vec<u8>), ControllerError> {
    validate_template(template)?;
    let html = render_html(snapshot, template).into_bytes();
    let json = render_json(snapshot)?;
    Ok((html, json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use census_types::ClusterInfo;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn snapshot() -> CensusSnapshot {
        let date = "2026-October-19".to_string();
        CensusSnapshot {
            generated_at: Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
            clusters: vec![
                ClusterInfo {
                    cluster_name: "prod".to_string(),
                    service_image_pair: BTreeMap::from([("web".to_string(), "nginx:1.2".to_string())]),
                    date: date.clone(),
                },
                ClusterInfo {
                    cluster_name: "stage".to_string(),
                    service_image_pair: BTreeMap::new(),
                    date,
                },
            ],
            services: vec!["web".to_string()],
        }
    }

    #[test]
    fn test_image_color_reference_values() {
        assert_eq!(image_color(""), "800000");
        assert_eq!(image_color("a"), "800000");
        assert_eq!(image_color("ab"), "144000");
        assert_eq!(image_color("abc"), "2d0000");
        assert_eq!(image_color("nginx:1.2"), "137a00");
        assert_eq!(image_color("nginx:1.2 | envoy:1.30"), "851c00");
    }

    #[test]
    fn test_image_color_is_six_hex_digits() {
        let long = "x".repeat(1000);
        assert_eq!(image_color(&long), "72539c");
        for summary in ["", "a", "nginx:1.2", long.as_str()] {
            let color = image_color(summary);
            assert_eq!(color.len(), 6);
            assert!(color.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            assert_eq!(color, image_color(summary));
        }
    }

    #[test]
    fn test_render_html_fills_cells() {
        let html = render_html(&snapshot(), DEFAULT_TEMPLATE);

        assert!(html.contains("Generated 2026-October-19"));
        assert!(html.contains("<td>prod</td><td>stage</td>"));
        assert!(html.contains(
            "<tr><td>web</td><td style=\"background-color:#137a00\">nginx:1.2</td><td>No image found</td></tr>"
        ));
        assert!(!html.contains("__"));
    }

    #[test]
    fn test_render_html_escapes_markup() {
        let mut snapshot = snapshot();
        snapshot.clusters[0].cluster_name = "<prod>".to_string();
        snapshot.clusters[0]
            .service_image_pair
            .insert("web".to_string(), "a&b".to_string());
        let html = render_html(&snapshot, "__CLUSTER_NAMES__|__VERSIONS__");
        assert!(html.contains("<td>&lt;prod&gt;</td>"));
        assert!(html.contains(">a&amp;b</td>"));
    }

    #[test]
    fn test_render_json_shape() {
        let json: serde_json::Value = serde_json::from_slice(&render_json(&snapshot()).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                { "clusterName": "prod", "serviceImagePair": { "web": "nginx:1.2" }, "date": "2026-October-19" },
                { "clusterName": "stage", "serviceImagePair": {}, "date": "2026-October-19" }
            ])
        );
    }

    #[test]
    fn test_render_rejects_template_without_rows() {
        let result = render(&snapshot(), "<table>__CLUSTER_NAMES__</table>");
        assert!(matches!(result, Err(ControllerError::Template(_))));
        assert!(validate_template(DEFAULT_TEMPLATE).is_ok());
    }
}
