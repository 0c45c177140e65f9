//! Error types shared by every layer of the card service.
//!
//! Source and handler errors surface to whoever asked for the collection.
//! Render, rasterize and delivery errors abort (or skip) one phase only; the
//! scheduler loop converts anything that reaches it into a backoff sleep.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The collection file is missing or could not be read.
    #[error("collection source unavailable at {}: {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    /// The collection file is not a non-empty list of records.
    #[error("invalid collection format in {}: {reason}", path.display())]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("collection '{0}' is not registered")]
    NotRegistered(String),

    #[error("collection '{0}' has no configuration file")]
    MissingConfig(String),

    #[error("card render failed: {0}")]
    Render(String),

    #[error("card rasterize failed: {0}")]
    Rasterize(String),

    #[error("delivery to {destination} failed: {reason}")]
    Delivery { destination: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn rasterize(msg: impl Into<String>) -> Self {
        Self::Rasterize(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn delivery(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Delivery {
            destination: destination.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotRegistered("klingon".into());
        assert_eq!(err.to_string(), "collection 'klingon' is not registered");

        let err = Error::SourceUnavailable {
            path: PathBuf::from("/tmp/words.json"),
            reason: "not found".into(),
        };
        assert!(err.to_string().contains("/tmp/words.json"));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(Error::render("x"), Error::Render(_)));
        assert!(matches!(Error::rasterize("x"), Error::Rasterize(_)));
        assert!(matches!(Error::config("x"), Error::Config(_)));
        assert!(matches!(
            Error::delivery("group-1", "timeout"),
            Error::Delivery { .. }
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
