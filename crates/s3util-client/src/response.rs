//! Response envelopes
//!
//! Every `S3Util` operation returns an [`S3UtilResponse`]: a body plus error
//! text that is empty on success. Batch downloads report one
//! [`ObjectOutcome`] per listed key.

use bytes::Bytes;
use s3util_common::{Error, Result};
use std::collections::BTreeMap;

/// Result body paired with error text (empty on success)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3UtilResponse<T> {
    body: T,
    error: String,
}

impl<T> S3UtilResponse<T> {
    pub fn new(body: T, error: impl Into<String>) -> Self {
        Self {
            body,
            error: error.into(),
        }
    }

    /// Successful response
    pub fn ok(body: T) -> Self {
        Self::new(body, String::new())
    }

    /// Failed response carrying `body` (usually empty or `false`)
    pub fn failed(body: T, error: &Error) -> Self {
        Self::new(body, error.to_string())
    }

    pub fn body(&self) -> &T {
        &self.body
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub fn into_body(self) -> T {
        self.body
    }

    /// Convert into a `Result`, keeping only the error text on failure
    pub fn into_result(self) -> std::result::Result<T, String> {
        if self.error.is_empty() {
            Ok(self.body)
        } else {
            Err(self.error)
        }
    }
}

impl<T: Default> From<Result<T>> for S3UtilResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(e) => Self::failed(T::default(), &e),
        }
    }
}

/// Outcome of downloading one key in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    Success { key: String },
    Failure { key: String, reason: String },
}

impl ObjectOutcome {
    pub fn failure(key: impl Into<String>, error: &Error) -> Self {
        Self::Failure {
            key: key.into(),
            reason: error.to_string(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Success { key } | Self::Failure { key, .. } => key,
        }
    }

    /// Legacy report text: the key on success, the failure reason otherwise
    #[must_use]
    pub fn error_text(&self) -> &str {
        match self {
            Self::Success { key } => key,
            Self::Failure { reason, .. } => reason,
        }
    }
}

/// Single download: `true` when the object was fully written
pub type GetObjectResponse = S3UtilResponse<bool>;
/// Listing: keys in listing order
pub type ListObjectsResponse = S3UtilResponse<Vec<String>>;
/// Batch download: one outcome per listed key, in listing order
pub type GetObjectsResponse = S3UtilResponse<Vec<ObjectOutcome>>;
/// Object attributes keyed by fixed names
pub type GetObjectMetadataResponse = S3UtilResponse<BTreeMap<String, String>>;
/// In-memory download body
pub type GetObjectBytesResponse = S3UtilResponse<Bytes>;

impl GetObjectsResponse {
    /// Number of keys downloaded successfully
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.body.iter().filter(|o| o.is_success()).count()
    }

    /// Number of keys that failed
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.body.len() - self.succeeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_from_result() {
        let ok: ListObjectsResponse = Ok(vec!["a".to_string()]).into();
        assert!(ok.is_ok());
        assert_eq!(ok.body(), &vec!["a".to_string()]);

        let failed: ListObjectsResponse = Err(Error::Timeout).into();
        assert!(!failed.is_ok());
        assert!(failed.body().is_empty());
        assert_eq!(failed.error(), "request timeout");
        assert_eq!(failed.into_result().unwrap_err(), "request timeout");
    }

    #[test]
    fn test_outcome_error_text() {
        let ok = ObjectOutcome::Success {
            key: "a/b".to_string(),
        };
        assert!(ok.is_success());
        assert_eq!(ok.error_text(), "a/b");

        let failed = ObjectOutcome::failure("a/c", &Error::download("a/c", "boom"));
        assert!(!failed.is_success());
        assert_eq!(failed.key(), "a/c");
        assert_eq!(failed.error_text(), "download of a/c failed: boom");
    }

    #[test]
    fn test_batch_counts() {
        let response = GetObjectsResponse::ok(vec![
            ObjectOutcome::Success { key: "a".into() },
            ObjectOutcome::Failure {
                key: "b".into(),
                reason: "x".into(),
            },
        ]);
        assert_eq!(response.succeeded(), 1);
        assert_eq!(response.failed_count(), 1);
    }
}
