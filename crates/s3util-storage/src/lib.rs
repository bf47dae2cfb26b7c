//! s3util Storage - local sinks for downloaded objects
//!
//! This crate implements the write side of a download:
//! - A direct I/O file writer (O_DIRECT / F_NOCACHE) that keeps the
//!   persisted size equal to the logical bytes written
//! - A stream-shaped adapter over that writer

pub mod direct_io;

// Re-exports
pub use direct_io::{ALIGNMENT, DirectFileSink, DirectFileWriter, page_size};
