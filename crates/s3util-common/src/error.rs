//! Error types for s3util
//!
//! Every fallible operation in the workspace returns [`Error`]. The batch
//! retriever folds these into response envelopes instead of propagating them,
//! so the `Display` text of each variant is what callers end up reading.

use crate::types::{BucketNameError, ObjectKeyError};
use std::path::PathBuf;
use thiserror::Error;

/// Common result type for s3util operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for s3util
#[derive(Debug, Error)]
pub enum Error {
    // Local sink errors
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("direct I/O is not supported for {}", .path.display())]
    DirectIoUnsupported { path: PathBuf },

    #[error("write failed on {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage service errors
    #[error("list objects failed for prefix {prefix:?}: {reason}")]
    List { prefix: String, reason: String },

    #[error("download of {key} failed: {reason}")]
    Download { key: String, reason: String },

    #[error("head object failed for {key}: {reason}")]
    Metadata { key: String, reason: String },

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("request timeout")]
    Timeout,

    // Parsing and validation
    #[error("invalid s3 path {path:?}: {reason}")]
    PathParse { path: String, reason: &'static str },

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(#[from] BucketNameError),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(#[from] ObjectKeyError),

    // Lifecycle and configuration
    #[error("s3util runtime is not initialized")]
    RuntimeNotInitialized,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a download error for `key`
    pub fn download(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a listing error for `prefix`
    pub fn list(prefix: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::List {
            prefix: prefix.into(),
            reason: reason.into(),
        }
    }

    /// Create a metadata error for `key`
    pub fn metadata(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Metadata {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this error is transient
    ///
    /// Informational only: nothing in this workspace retries on it.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(!Error::download("k", "boom").is_retryable());
    }

    #[test]
    fn test_error_not_found() {
        assert!(
            Error::ObjectNotFound {
                bucket: "b".into(),
                key: "k".into()
            }
            .is_not_found()
        );
        assert!(!Error::RuntimeNotInitialized.is_not_found());
    }

    #[test]
    fn test_error_display_names_the_key() {
        let err = Error::download("logs/a.txt", "connection reset");
        assert_eq!(
            err.to_string(),
            "download of logs/a.txt failed: connection reset"
        );
    }
}
