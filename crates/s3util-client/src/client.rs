//! Storage client capability
//!
//! The batch retriever only needs three calls from the object store: a paged
//! listing, a streaming GET and a HEAD. Authentication, retries and the wire
//! protocol all live behind this trait.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use s3util_common::Result;

/// Chunked object body
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// One page of a listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: String,
    /// Keys whose remainder after `prefix` contains this are rolled up into
    /// common prefixes. Empty lists recursively.
    pub delimiter: String,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

impl ListRequest {
    /// Default page size, matching the S3 service limit
    pub const DEFAULT_MAX_KEYS: usize = 1000;

    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        delimiter: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            delimiter: delimiter.into(),
            continuation_token: None,
            max_keys: Self::DEFAULT_MAX_KEYS,
        }
    }

    /// Continue after a previous page
    #[must_use]
    pub fn with_continuation_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    #[must_use]
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }
}

/// Result of one listing call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Object keys in lexicographic order
    pub keys: Vec<String>,
    pub common_prefixes: Vec<String>,
    /// Set when more keys remain
    pub next_continuation_token: Option<String>,
}

/// Attributes returned by a HEAD request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub content_length: u64,
    /// Entity tag as sent by the service, possibly quoted
    pub etag: Option<String>,
    /// Last modification time (unix seconds)
    pub last_modified: Option<u64>,
}

/// Object store operations consumed by [`S3Util`](crate::S3Util)
///
/// Implementations must be safe to call concurrently from many tasks.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// List one page of keys under a prefix
    async fn list_objects(&self, request: &ListRequest) -> Result<ListPage>;

    /// Open a streaming download of an object
    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream>;

    /// Fetch object attributes without transferring the body
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectAttributes>;
}
