//! Download destinations
//!
//! An object body is streamed into one of three sinks: memory, a regular
//! buffered file, or a direct I/O file. Direct I/O writes block, so they run
//! on the blocking pool with the sink moved in and back out for each chunk.

use bytes::{Bytes, BytesMut};
use s3util_common::{Error, Result};
use s3util_storage::DirectFileSink;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::spawn_blocking;

/// What a sink produced once closed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkOutput {
    pub bytes_written: u64,
    /// Object body, for in-memory sinks only
    pub body: Option<Bytes>,
}

/// Destination for one object download
#[derive(Debug)]
pub enum ObjectSink {
    Memory(BytesMut),
    Buffered {
        path: PathBuf,
        file: BufWriter<tokio::fs::File>,
        written: u64,
    },
    /// `None` only while a write is in flight on the blocking pool
    Direct {
        path: PathBuf,
        sink: Option<DirectFileSink>,
    },
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(e))
}

impl ObjectSink {
    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(BytesMut::new())
    }

    /// Create (or truncate) a regular file at `path`
    pub async fn buffered(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::Buffered {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            written: 0,
        })
    }

    /// Create (or truncate) a direct I/O file at `path`
    pub async fn direct(path: &Path, n_pages: usize) -> Result<Self> {
        let owned = path.to_path_buf();
        let sink = spawn_blocking(move || DirectFileSink::create(owned, n_pages))
            .await
            .map_err(join_error)??;
        Ok(Self::Direct {
            path: path.to_path_buf(),
            sink: Some(sink),
        })
    }

    /// Append one chunk of the object body
    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        match self {
            Self::Memory(buf) => {
                buf.extend_from_slice(&chunk);
                Ok(())
            }
            Self::Buffered {
                path,
                file,
                written,
            } => {
                file.write_all(&chunk).await.map_err(|source| Error::Write {
                    path: path.clone(),
                    source,
                })?;
                *written += chunk.len() as u64;
                Ok(())
            }
            Self::Direct { path, sink } => {
                let mut owned = sink.take().ok_or_else(|| Error::Write {
                    path: path.clone(),
                    source: std::io::Error::other("direct I/O sink lost by an earlier write"),
                })?;
                let (owned, result) = spawn_blocking(move || {
                    let result = owned.write_all(&chunk);
                    (owned, result)
                })
                .await
                .map_err(join_error)?;
                *sink = Some(owned);
                result.map_err(|source| Error::Write {
                    path: path.clone(),
                    source,
                })
            }
        }
    }

    /// Flush and close the destination
    pub async fn finish(self) -> Result<SinkOutput> {
        match self {
            Self::Memory(buf) => Ok(SinkOutput {
                bytes_written: buf.len() as u64,
                body: Some(buf.freeze()),
            }),
            Self::Buffered {
                path,
                mut file,
                written,
            } => {
                file.flush()
                    .await
                    .map_err(|source| Error::Write { path, source })?;
                Ok(SinkOutput {
                    bytes_written: written,
                    body: None,
                })
            }
            Self::Direct { sink: None, .. } => Ok(SinkOutput::default()),
            Self::Direct {
                sink: Some(sink), ..
            } => {
                let bytes_written = spawn_blocking(move || sink.finish())
                    .await
                    .map_err(join_error)??;
                Ok(SinkOutput {
                    bytes_written,
                    body: None,
                })
            }
        }
    }
}
