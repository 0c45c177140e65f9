//! Raw record loading for a single collection file.

use crate::error::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

/// How many leading records are shape-checked before the file is accepted.
const SAMPLE_SIZE: usize = 10;

/// Reads the raw record list of one collection from a JSON file.
#[derive(Debug, Clone)]
pub struct CollectionSource {
    path: PathBuf,
}

impl CollectionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and shape-check the raw records.
    ///
    /// # Errors
    ///
    /// - [`Error::SourceUnavailable`] if the file is missing or unreadable
    /// - [`Error::InvalidFormat`] if it is not JSON, not a list, empty, or its
    ///   leading records are not objects
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn load_records(&self) -> Result<Vec<Value>> {
        let raw = fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::SourceUnavailable {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let value: Value = serde_json::from_str(&raw).map_err(|e| self.invalid(e.to_string()))?;
        let records = self.validate(value)?;
        debug!(count = records.len(), "Loaded raw records");
        Ok(records)
    }

    fn validate(&self, value: Value) -> Result<Vec<Value>> {
        let Value::Array(records) = value else {
            return Err(self.invalid("top-level value is not a list"));
        };
        if records.is_empty() {
            return Err(self.invalid("record list is empty"));
        }
        if let Some(pos) = records.iter().take(SAMPLE_SIZE).position(|r| !r.is_object()) {
            return Err(self.invalid(format!("record {pos} is not an object")));
        }
        Ok(records)
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidFormat {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn source_with(content: &str) -> (tempfile::TempDir, CollectionSource) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("words.json");
        tokio::fs::write(&path, content).await.unwrap();
        (tmp, CollectionSource::new(path))
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let source = CollectionSource::new(tmp.path().join("missing.json"));
        assert!(matches!(
            source.load_records().await,
            Err(Error::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_shapes() {
        for content in ["{\"word\": \"a\"}", "[]", "[1, 2]", "not json"] {
            let (_tmp, source) = source_with(content).await;
            assert!(
                matches!(source.load_records().await, Err(Error::InvalidFormat { .. })),
                "expected InvalidFormat for {content}"
            );
        }
    }

    #[tokio::test]
    async fn test_accepts_record_list() {
        let (_tmp, source) = source_with(r#"[{"word": "a"}, {"word": "b"}]"#).await;
        let records = source.load_records().await.unwrap();
        assert_eq!(records.len(), 2);
    }
}
