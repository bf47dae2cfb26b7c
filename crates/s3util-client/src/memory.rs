//! In-memory storage client
//!
//! A [`StorageClient`] over sorted in-process maps. Listing follows S3
//! semantics (lexicographic order, delimiter roll-up, continuation tokens)
//! and failures or latency can be injected per key.

use crate::client::{ByteStream, ListPage, ListRequest, ObjectAttributes, StorageClient};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use s3util_common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: u64,
}

#[derive(Debug, Clone)]
enum InjectedFailure {
    /// Fail when the download is opened
    OnOpen(String),
    /// Deliver the first chunk, then fail
    MidStream(String),
}

/// In-memory object store
#[derive(Debug)]
pub struct MemoryStorage {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    failures: RwLock<HashMap<(String, String), InjectedFailure>>,
    delays: RwLock<HashMap<(String, String), Duration>>,
    chunk_size: usize,
    /// Upper bound on keys per listing page, whatever the request asks for
    page_limit: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Stream object bodies in chunks of `chunk_size` bytes
    #[must_use]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            failures: RwLock::new(HashMap::new()),
            delays: RwLock::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
            page_limit: usize::MAX,
        }
    }

    /// Cap listing pages at `page_limit` entries
    #[must_use]
    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    /// Create an empty bucket (no-op if it exists)
    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Store an object, creating the bucket if needed
    pub fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let object = StoredObject {
            etag: format!("\"{:x}\"", md5::compute(&data)),
            last_modified: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            data,
        };
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    /// Make every download of `key` fail when opened
    pub fn inject_failure(&self, bucket: &str, key: &str, reason: impl Into<String>) {
        self.failures.write().insert(
            (bucket.to_string(), key.to_string()),
            InjectedFailure::OnOpen(reason.into()),
        );
    }

    /// Make every download of `key` fail after its first chunk
    pub fn inject_stream_failure(&self, bucket: &str, key: &str, reason: impl Into<String>) {
        self.failures.write().insert(
            (bucket.to_string(), key.to_string()),
            InjectedFailure::MidStream(reason.into()),
        );
    }

    /// Delay opening downloads of `key`
    pub fn set_latency(&self, bucket: &str, key: &str, delay: Duration) {
        self.delays
            .write()
            .insert((bucket.to_string(), key.to_string()), delay);
    }

    fn lookup(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn chunks(&self, data: &Bytes) -> Vec<Bytes> {
        (0..data.len())
            .step_by(self.chunk_size)
            .map(|start| data.slice(start..(start + self.chunk_size).min(data.len())))
            .collect()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn list_objects(&self, request: &ListRequest) -> Result<ListPage> {
        let buckets = self.buckets.read();
        let objects = buckets.get(&request.bucket).ok_or_else(|| {
            Error::list(&request.prefix, format!("no such bucket: {}", request.bucket))
        })?;

        let start = match &request.continuation_token {
            Some(token) => Bound::Excluded(token.as_str()),
            None => Bound::Included(request.prefix.as_str()),
        };

        let max_keys = request.max_keys.clamp(1, self.page_limit);
        let mut page = ListPage::default();
        let mut emitted = 0;
        let mut last_key: Option<&str> = None;

        for key in objects
            .range::<str, _>((start, Bound::Unbounded))
            .map(|(key, _)| key.as_str())
            .take_while(|key| key.starts_with(&request.prefix))
        {
            let rest = &key[request.prefix.len()..];
            let common_prefix = (!request.delimiter.is_empty())
                .then(|| rest.find(&request.delimiter))
                .flatten()
                .map(|pos| &key[..request.prefix.len() + pos + request.delimiter.len()]);

            if let Some(prefix) = common_prefix {
                if page.common_prefixes.last().map(String::as_str) == Some(prefix) {
                    last_key = Some(key);
                    continue;
                }
            }

            if emitted == max_keys {
                page.next_continuation_token = last_key.map(str::to_string);
                break;
            }

            match common_prefix {
                Some(prefix) => page.common_prefixes.push(prefix.to_string()),
                None => page.keys.push(key.to_string()),
            }
            emitted += 1;
            last_key = Some(key);
        }

        Ok(page)
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream> {
        let id = (bucket.to_string(), key.to_string());
        let delay = self.delays.read().get(&id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failures.read().get(&id).cloned();
        if let Some(InjectedFailure::OnOpen(reason)) = &failure {
            return Err(Error::download(key, reason.clone()));
        }

        let object = self.lookup(bucket, key)?;
        let mut chunks: Vec<Result<Bytes>> =
            self.chunks(&object.data).into_iter().map(Ok).collect();
        if let Some(InjectedFailure::MidStream(reason)) = failure {
            chunks.truncate(1);
            chunks.push(Err(Error::download(key, reason)));
        }

        Ok(stream::iter(chunks).boxed())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectAttributes> {
        let object = self.lookup(bucket, key)?;
        Ok(ObjectAttributes {
            content_length: object.data.len() as u64,
            etag: Some(object.etag),
            last_modified: Some(object.last_modified),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn storage_with(keys: &[&str]) -> MemoryStorage {
        let storage = MemoryStorage::new();
        for key in keys {
            storage.put_object("bucket", key, key.as_bytes().to_vec());
        }
        storage
    }

    #[tokio::test]
    async fn test_list_with_delimiter() {
        let storage = storage_with(&["a/1", "a/2", "a/sub/3", "a/sub/4", "b/1"]);

        let page = storage
            .list_objects(&ListRequest::new("bucket", "a/", "/"))
            .await
            .unwrap();
        assert_eq!(page.keys, vec!["a/1", "a/2"]);
        assert_eq!(page.common_prefixes, vec!["a/sub/"]);
        assert!(page.next_continuation_token.is_none());

        let page = storage
            .list_objects(&ListRequest::new("bucket", "a/", ""))
            .await
            .unwrap();
        assert_eq!(page.keys, vec!["a/1", "a/2", "a/sub/3", "a/sub/4"]);
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let storage = storage_with(&["p/1", "p/2", "p/3", "p/4", "p/5"]);
        let mut request = ListRequest::new("bucket", "p/", "/").with_max_keys(2);
        let mut keys = Vec::new();

        loop {
            let page = storage.list_objects(&request).await.unwrap();
            keys.extend(page.keys);
            match page.next_continuation_token {
                Some(token) => request = request.with_continuation_token(Some(token)),
                None => break,
            }
        }

        assert_eq!(keys, vec!["p/1", "p/2", "p/3", "p/4", "p/5"]);
    }

    #[tokio::test]
    async fn test_list_missing_bucket() {
        let storage = MemoryStorage::new();
        let err = storage
            .list_objects(&ListRequest::new("nope", "", "/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::List { .. }));
    }

    #[tokio::test]
    async fn test_get_object_stream_chunks() {
        let storage = MemoryStorage::with_chunk_size(4);
        storage.put_object("bucket", "k", b"0123456789".to_vec());

        let chunks: Vec<Bytes> = storage
            .get_object_stream("bucket", "k")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), b"0123456789");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let storage = MemoryStorage::with_chunk_size(2);
        storage.put_object("bucket", "open", b"abcd".to_vec());
        storage.put_object("bucket", "mid", b"abcd".to_vec());
        storage.inject_failure("bucket", "open", "access denied");
        storage.inject_stream_failure("bucket", "mid", "connection reset");

        assert!(storage.get_object_stream("bucket", "open").await.is_err());

        let mut stream = storage.get_object_stream("bucket", "mid").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert!(stream.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_head_object() {
        let storage = storage_with(&["x"]);
        let attrs = storage.head_object("bucket", "x").await.unwrap();
        assert_eq!(attrs.content_length, 1);
        assert_eq!(
            attrs.etag.as_deref(),
            Some(format!("\"{:x}\"", md5::compute(b"x")).as_str())
        );

        let err = storage.head_object("bucket", "y").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
