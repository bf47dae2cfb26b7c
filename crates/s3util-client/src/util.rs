//! Batch object retrieval
//!
//! [`S3Util`] binds a [`StorageClient`] to one bucket and layers listing,
//! downloads and metadata lookups on top of it. Nothing here returns early on
//! a per-object problem: every call produces an envelope, and batch downloads
//! produce one [`ObjectOutcome`] per listed key, in listing order, no matter
//! how many of them failed or in which order they completed.

use crate::client::{ByteStream, ListRequest, ObjectAttributes, StorageClient};
use crate::ratelimit::TokenBucket;
use crate::response::{
    GetObjectBytesResponse, GetObjectMetadataResponse, GetObjectResponse, GetObjectsResponse,
    ListObjectsResponse, ObjectOutcome,
};
use crate::runtime::is_runtime_initialized;
use crate::sink::{ObjectSink, SinkOutput};
use futures::stream::{self, StreamExt};
use s3util_common::{BucketName, ClientOptions, Error, ObjectKey, Result, S3UtilConfig};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Delimiter used by [`S3Util::list_objects`]
pub const DEFAULT_DELIMITER: &str = "/";

/// Metadata map key for the object size in bytes
pub const META_CONTENT_LENGTH: &str = "content-length";
/// Metadata map key for the content hash (etag without quotes)
pub const META_MD5: &str = "md5";
/// Metadata map key for the modification time in unix seconds
pub const META_LAST_MODIFIED: &str = "last-modified";

/// Object store access bound to a single bucket
///
/// Safe to share across tasks; concurrent downloads draw from one read-rate
/// budget.
pub struct S3Util {
    bucket: BucketName,
    client: Arc<dyn StorageClient>,
    config: S3UtilConfig,
    rate_limiter: Option<Arc<TokenBucket>>,
}

impl std::fmt::Debug for S3Util {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Util")
            .field("bucket", &self.bucket)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl S3Util {
    /// Wrap an already constructed storage client
    ///
    /// Prefer [`build`](Self::build). Fails if [`init_runtime`](crate::init_runtime)
    /// has not been called, or if the configuration or bucket name is invalid.
    pub fn new(client: Arc<dyn StorageClient>, config: S3UtilConfig) -> Result<Self> {
        if !is_runtime_initialized() {
            return Err(Error::RuntimeNotInitialized);
        }
        config.validate()?;
        let bucket = BucketName::new(config.bucket.clone())?;
        let rate_limiter = config
            .read_ratelimit_bytes_per_sec()
            .map(|rate| Arc::new(TokenBucket::per_second(rate)));

        Ok(Self {
            bucket,
            client,
            config,
            rate_limiter,
        })
    }

    /// Construct the storage client from the configured timeouts and wrap it
    pub fn build<C, F>(config: S3UtilConfig, connect: F) -> Result<Self>
    where
        C: StorageClient + 'static,
        F: FnOnce(ClientOptions) -> Result<C>,
    {
        if !is_runtime_initialized() {
            return Err(Error::RuntimeNotInitialized);
        }
        let client = connect(config.client_options())?;
        info!(
            bucket = %config.bucket,
            read_ratelimit_mb = config.read_ratelimit_mb,
            "built s3util client"
        );
        Self::new(Arc::new(client), config)
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        self.bucket.as_str()
    }

    #[must_use]
    pub fn config(&self) -> &S3UtilConfig {
        &self.config
    }

    /// Split `s3://<bucket>/<path>` into `(bucket, path)`
    pub fn parse_full_s3_path(path: &str) -> Result<(String, String)> {
        s3util_common::parse_full_s3_path(path).map(s3util_common::S3Path::into_parts)
    }

    /// List keys directly under `prefix` (delimiter `/`)
    pub async fn list_objects(&self, prefix: &str) -> ListObjectsResponse {
        self.list_objects_with_delimiter(prefix, DEFAULT_DELIMITER).await
    }

    /// List keys under `prefix`; an empty delimiter lists recursively
    pub async fn list_objects_with_delimiter(
        &self,
        prefix: &str,
        delimiter: &str,
    ) -> ListObjectsResponse {
        let result = self.list_keys(prefix, delimiter).await;
        if let Err(e) = &result {
            warn!(prefix, error = %e, "list objects failed");
        }
        result.into()
    }

    /// Download one object
    ///
    /// With a `local_path` the body is streamed to that file, through the
    /// direct I/O writer when `direct_io` is set. Without one the body is
    /// read into memory and discarded; see
    /// [`get_object_bytes`](Self::get_object_bytes) to keep it.
    pub async fn get_object(
        &self,
        key: &str,
        local_path: Option<&Path>,
        direct_io: bool,
    ) -> GetObjectResponse {
        match self.download(key, local_path, direct_io).await {
            Ok(_) => GetObjectResponse::ok(true),
            Err(e) => {
                warn!(key, error = %e, "get object failed");
                GetObjectResponse::failed(false, &e)
            }
        }
    }

    /// Download one object into memory
    pub async fn get_object_bytes(&self, key: &str) -> GetObjectBytesResponse {
        let result = self
            .download(key, None, false)
            .await
            .map(|output| output.body.unwrap_or_default());
        if let Err(e) = &result {
            warn!(key, error = %e, "get object failed");
        }
        result.into()
    }

    /// Download every key listed under `prefix` into `local_directory`
    ///
    /// Each object lands at `local_directory/<key>`, with intermediate
    /// directories created as needed. Up to `max_concurrent_downloads`
    /// objects are fetched at once. The envelope only carries an error when
    /// the directory cannot be created or the listing fails; per-object
    /// failures are reported in the outcomes.
    pub async fn get_objects(
        &self,
        prefix: &str,
        local_directory: impl AsRef<Path>,
        delimiter: &str,
        direct_io: bool,
    ) -> GetObjectsResponse {
        let local_directory = local_directory.as_ref();
        if let Err(source) = tokio::fs::create_dir_all(local_directory).await {
            let e = Error::Open {
                path: local_directory.to_path_buf(),
                source,
            };
            warn!(error = %e, "cannot prepare download directory");
            return GetObjectsResponse::failed(Vec::new(), &e);
        }

        let keys = match self.list_keys(prefix, delimiter).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix, error = %e, "list objects failed");
                return GetObjectsResponse::failed(Vec::new(), &e);
            }
        };

        let mut outcomes: Vec<Option<ObjectOutcome>> = vec![None; keys.len()];
        let mut downloads = stream::iter(keys.into_iter().enumerate())
            .map(|(index, key)| async move {
                let outcome = self
                    .download_to_directory(key, local_directory, direct_io)
                    .await;
                (index, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_downloads);

        while let Some((index, outcome)) = downloads.next().await {
            outcomes[index] = Some(outcome);
        }

        let response = GetObjectsResponse::ok(outcomes.into_iter().flatten().collect());
        info!(
            prefix,
            succeeded = response.succeeded(),
            failed = response.failed_count(),
            "batch download finished"
        );
        response
    }

    /// Fetch object attributes without downloading the body
    pub async fn get_object_metadata(&self, key: &str) -> GetObjectMetadataResponse {
        let result = self
            .with_timeout(self.client.head_object(self.bucket.as_str(), key))
            .await
            .map(|attrs| metadata_map(&attrs))
            .map_err(|e| match e {
                e @ (Error::ObjectNotFound { .. } | Error::Metadata { .. }) => e,
                e => Error::metadata(key, e.to_string()),
            });
        if let Err(e) = &result {
            warn!(key, error = %e, "get object metadata failed");
        }
        result.into()
    }

    /// Collect every page of a listing
    async fn list_keys(&self, prefix: &str, delimiter: &str) -> Result<Vec<String>> {
        let mut request = ListRequest::new(self.bucket.as_str(), prefix, delimiter);
        let mut keys = Vec::new();

        loop {
            let page = self
                .with_timeout(self.client.list_objects(&request))
                .await
                .map_err(|e| match e {
                    e @ Error::List { .. } => e,
                    e => Error::list(prefix, e.to_string()),
                })?;
            keys.extend(page.keys);

            match page.next_continuation_token {
                Some(token) => request = request.with_continuation_token(Some(token)),
                None => break,
            }
        }

        debug!(prefix, delimiter, count = keys.len(), "listed objects");
        Ok(keys)
    }

    async fn download_to_directory(
        &self,
        key: String,
        local_directory: &Path,
        direct_io: bool,
    ) -> ObjectOutcome {
        let result: Result<SinkOutput> = async {
            let path = local_path_for(local_directory, &key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| Error::Open {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            self.download(&key, Some(&path), direct_io).await
        }
        .await;

        match result {
            Ok(_) => ObjectOutcome::Success { key },
            Err(e) => {
                warn!(key = %key, error = %e, "object download failed");
                ObjectOutcome::failure(key, &e)
            }
        }
    }

    /// Open the object, then the destination, and stream one into the other
    async fn download(
        &self,
        key: &str,
        local_path: Option<&Path>,
        direct_io: bool,
    ) -> Result<SinkOutput> {
        let key = ObjectKey::new(key)?;
        let body = self
            .with_timeout(
                self.client
                    .get_object_stream(self.bucket.as_str(), key.as_str()),
            )
            .await
            .map_err(|e| download_error(&key, e))?;

        let mut sink = match local_path {
            None => ObjectSink::memory(),
            Some(path) if direct_io => {
                ObjectSink::direct(path, self.config.direct_io_buffer_n_pages).await?
            }
            Some(path) => ObjectSink::buffered(path).await?,
        };

        match self.copy_body(&key, body, &mut sink).await {
            Ok(()) => {
                let output = sink.finish().await?;
                debug!(key = %key, bytes = output.bytes_written, "downloaded object");
                Ok(output)
            }
            Err(e) => {
                // Close the destination so a direct I/O tail is still truncated
                if let Err(close_err) = sink.finish().await {
                    warn!(key = %key, error = %close_err, "failed to close partial download");
                }
                Err(e)
            }
        }
    }

    async fn copy_body(
        &self,
        key: &ObjectKey,
        mut body: ByteStream,
        sink: &mut ObjectSink,
    ) -> Result<()> {
        let timeout = self.config.request_timeout();
        while let Some(chunk) = tokio::time::timeout(timeout, body.next())
            .await
            .map_err(|_| download_error(key, Error::Timeout))?
        {
            let chunk = chunk.map_err(|e| download_error(key, e))?;
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire(chunk.len() as u64).await;
            }
            sink.write_chunk(chunk).await?;
        }

        Ok(())
    }

    async fn with_timeout<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.request_timeout(), request)
            .await
            .map_err(|_| Error::Timeout)?
    }
}

/// Keep not-found and download errors as they are, wrap anything else
fn download_error(key: &ObjectKey, e: Error) -> Error {
    match e {
        e @ (Error::ObjectNotFound { .. } | Error::Download { .. }) => e,
        e => Error::download(key.as_str(), e.to_string()),
    }
}

/// Map an object key to a file under `local_directory`
///
/// Empty and `.` segments are skipped; `..` segments and keys that name a
/// directory (trailing `/`) are rejected.
fn local_path_for(local_directory: &Path, key: &str) -> Result<PathBuf> {
    if key.ends_with('/') {
        return Err(Error::download(key, "key names a directory"));
    }

    let mut path = local_directory.to_path_buf();
    let mut segments = 0;
    for segment in key.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(Error::download(key, "key escapes the download directory")),
            segment => {
                path.push(segment);
                segments += 1;
            }
        }
    }

    if segments == 0 {
        return Err(Error::download(key, "key has no file name"));
    }
    Ok(path)
}

fn metadata_map(attrs: &ObjectAttributes) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(
        META_CONTENT_LENGTH.to_string(),
        attrs.content_length.to_string(),
    );
    if let Some(etag) = &attrs.etag {
        map.insert(META_MD5.to_string(), etag.trim_matches('"').to_string());
    }
    if let Some(modified) = attrs.last_modified {
        map.insert(META_LAST_MODIFIED.to_string(), modified.to_string());
    }
    map
}
