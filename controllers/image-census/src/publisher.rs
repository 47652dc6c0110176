//! Artifact publishing.
//!
//! Both artifacts of a cycle are first written to temporary files in their
//! target directories. Only when both writes succeeded are they renamed over
//! the previous ones, so readers see either the old or the new document in
//! full and a failed cycle leaves both artifacts as they were.

use crate::error::ControllerError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// File name of the HTML artifact.
pub const HTML_FILE_NAME: &str = "census.html";

/// File name of the JSON artifact.
pub const JSON_FILE_NAME: &str = "census.json";

/// Fixed locations of the published artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// HTML table
    pub html: PathBuf,
    /// JSON document served over HTTP
    pub json: PathBuf,
}

impl ArtifactPaths {
    /// Artifact paths inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            html: dir.join(HTML_FILE_NAME),
            json: dir.join(JSON_FILE_NAME),
        }
    }
}

/// Writes `contents` to a temporary file next to `path`.
///
/// The parent directory is created if missing. Dropping the returned file
/// removes it.
fn stage(path: &Path, contents: &[u8]) -> Result<NamedTempFile, ControllerError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    Ok(file)
}

fn commit(file: NamedTempFile, path: &Path) -> Result<(), ControllerError> {
    file.persist(path).map_err(|e| ControllerError::Artifact(e.error))?;
    debug!(path = %path.display(), "Artifact written");
    Ok(())
}

/// Publishes both artifacts of one cycle.
///
/// # Errors
///
/// Fails if either artifact cannot be staged, in which case neither is
/// replaced, or if a rename fails.
pub fn publish(paths: &ArtifactPaths, html: &[u8], json: &[u8]) -> Result<(), ControllerError> {
    let staged_html = stage(&paths.html, html)?;
    let staged_json = stage(&paths.json, json)?;

    commit(staged_html, &paths.html)?;
    commit(staged_json, &paths.json)?;
    debug!(html_bytes = html.len(), json_bytes = json.len(), "Artifacts published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_writes_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path().join("out"));

        publish(&paths, b"<html/>", b"[]").unwrap();

        assert_eq!(std::fs::read(&paths.html).unwrap(), b"<html/>");
        assert_eq!(std::fs::read(&paths.json).unwrap(), b"[]");
    }

    #[test]
    fn test_publish_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path());

        publish(&paths, b"<p>old</p>", b"[{\"clusterName\":\"old\"}]").unwrap();
        publish(&paths, b"<p>new</p>", b"[]").unwrap();

        assert_eq!(std::fs::read(&paths.html).unwrap(), b"<p>new</p>");
        assert_eq!(std::fs::read(&paths.json).unwrap(), b"[]");
        // No temporary files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_publish_fails_when_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("out");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = publish(&ArtifactPaths::in_dir(&blocker), b"<html/>", b"[]");
        assert!(matches!(result, Err(ControllerError::Artifact(_))));
    }

    #[test]
    fn test_failed_json_leaves_previous_html_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let html_dir = dir.path().join("html");
        let blocker = dir.path().join("json");
        let paths = ArtifactPaths {
            html: html_dir.join(HTML_FILE_NAME),
            json: blocker.join(JSON_FILE_NAME),
        };
        publish(&paths, b"<p>old</p>", b"[]").unwrap();

        // The JSON directory turns into a plain file, so staging the JSON fails
        std::fs::remove_dir_all(&blocker).unwrap();
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = publish(&paths, b"<p>new</p>", b"[]");
        assert!(matches!(result, Err(ControllerError::Artifact(_))));
        assert_eq!(std::fs::read(&paths.html).unwrap(), b"<p>old</p>");
        // The staged HTML was discarded
        assert_eq!(std::fs::read_dir(&html_dir).unwrap().count(), 1);
    }
}
