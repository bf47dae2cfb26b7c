//! Core type definitions for s3util
//!
//! Bucket and key newtypes plus the `<scheme>://<bucket>/<key>` path form
//! accepted by [`parse_full_s3_path`].

use crate::error::{Error, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the bucket a client is bound to
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct BucketName(String);

impl BucketName {
    /// Create a new bucket name
    ///
    /// Only checks that the name can address a bucket: it must be non-empty
    /// and must not contain `/`. Naming rules for new buckets are left to the
    /// service, so legacy and third-party names pass through unchanged.
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, BucketNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(BucketNameError::Empty);
        }
        if name.contains('/') {
            return Err(BucketNameError::ContainsSlash);
        }
        Ok(Self(name))
    }

    /// Get the bucket name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketName({:?})", self.0)
    }
}

/// Errors that can occur when creating a bucket name
#[derive(Debug, Clone, thiserror::Error)]
pub enum BucketNameError {
    #[error("bucket name cannot be empty")]
    Empty,
    #[error("bucket name cannot contain '/'")]
    ContainsSlash,
}

/// Object key (path within a bucket)
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Create a new object key
    pub fn new(key: impl Into<String>) -> std::result::Result<Self, ObjectKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ObjectKeyError::Empty);
        }
        // Maximum length: 1024 bytes (UTF-8)
        if key.len() > 1024 {
            return Err(ObjectKeyError::TooLong);
        }
        Ok(Self(key))
    }

    /// Get the object key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the inner string
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({:?})", self.0)
    }
}

/// Errors that can occur when creating an object key
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObjectKeyError {
    #[error("object key cannot be empty")]
    Empty,
    #[error("object key cannot exceed 1024 bytes")]
    TooLong,
}

/// A fully qualified object location, `<scheme>://<bucket>/<key>`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct S3Path {
    pub bucket: String,
    /// May be empty when the path names the bucket root
    pub key: String,
}

impl S3Path {
    /// Split into `(bucket, key)`
    #[must_use]
    pub fn into_parts(self) -> (String, String) {
        (self.bucket, self.key)
    }
}

impl fmt::Display for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl std::str::FromStr for S3Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_full_s3_path(s)
    }
}

/// Split a full path like `s3://<bucket>/<path>` into bucket and key.
///
/// Any non-empty scheme is accepted (`s3`, `s3a`, `s3n`, ...). The key is
/// everything after the first `/` following the bucket, and may be empty.
pub fn parse_full_s3_path(path: &str) -> Result<S3Path> {
    let invalid = |reason| Error::PathParse {
        path: path.to_string(),
        reason,
    };

    let (scheme, rest) = path.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
    if scheme.is_empty() {
        return Err(invalid("missing scheme"));
    }

    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(invalid("missing bucket"));
    }

    Ok(S3Path {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}
