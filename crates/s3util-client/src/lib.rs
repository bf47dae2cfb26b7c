//! s3util Client - batch object retrieval
//!
//! This crate lists, downloads and inspects objects through a pluggable
//! [`StorageClient`], reporting one outcome per object instead of failing a
//! whole batch:
//! - [`S3Util`]: listing, single and batch downloads, metadata
//! - [`TokenBucket`]: read-rate ceiling shared by concurrent downloads
//! - [`MemoryStorage`]: in-process [`StorageClient`] backed by a sorted map
//! - [`init_runtime`] / [`shutdown_runtime`]: process-wide lifecycle

pub mod client;
pub mod memory;
pub mod ratelimit;
pub mod response;
pub mod runtime;
pub mod sink;
pub mod util;

// Re-exports
pub use client::{ByteStream, ListPage, ListRequest, ObjectAttributes, StorageClient};
pub use memory::MemoryStorage;
pub use ratelimit::TokenBucket;
pub use response::{
    GetObjectBytesResponse, GetObjectMetadataResponse, GetObjectResponse, GetObjectsResponse,
    ListObjectsResponse, ObjectOutcome, S3UtilResponse,
};
pub use runtime::{init_runtime, is_runtime_initialized, shutdown_runtime};
pub use s3util_common::{Error, Result, S3Path, S3UtilConfig, parse_full_s3_path};
pub use sink::{ObjectSink, SinkOutput};
pub use util::S3Util;
