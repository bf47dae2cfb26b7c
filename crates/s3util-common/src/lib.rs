//! s3util Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, object-store path types and
//! configuration shared by the direct I/O sink and the batch retriever.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ClientOptions, MAX_DIRECT_IO_BUFFER_N_PAGES, S3UtilConfig};
pub use error::{Error, Result};
pub use types::*;
