//! Configuration types for s3util
//!
//! [`S3UtilConfig`] carries the client tunables: bucket, read-rate ceiling,
//! request timeouts, direct I/O buffer size and download fan-out.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest accepted `direct_io_buffer_n_pages` (64 MiB with 4 KiB pages)
pub const MAX_DIRECT_IO_BUFFER_N_PAGES: usize = 16 * 1024;

/// Root configuration for an `S3Util` client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3UtilConfig {
    /// Bucket the client is bound to
    pub bucket: String,
    /// Read-rate ceiling in MB/s shared by all downloads (0 = unlimited)
    pub read_ratelimit_mb: u32,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Number of pages in each direct I/O write buffer
    pub direct_io_buffer_n_pages: usize,
    /// Maximum number of objects downloaded concurrently by `get_objects`
    pub max_concurrent_downloads: usize,
}

impl Default for S3UtilConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            read_ratelimit_mb: 50,
            connect_timeout_ms: 60_000,
            request_timeout_ms: 60_000,
            direct_io_buffer_n_pages: 1,
            max_concurrent_downloads: 8,
        }
    }
}

impl S3UtilConfig {
    /// Config for `bucket` with every other setting at its default
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_DIRECT_IO_BUFFER_N_PAGES).contains(&self.direct_io_buffer_n_pages) {
            return Err(Error::configuration(format!(
                "direct_io_buffer_n_pages must be between 1 and {MAX_DIRECT_IO_BUFFER_N_PAGES}"
            )));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(Error::configuration(
                "max_concurrent_downloads must be at least 1",
            ));
        }
        Ok(())
    }

    /// Read-rate ceiling in bytes per second, `None` when unlimited
    #[must_use]
    pub fn read_ratelimit_bytes_per_sec(&self) -> Option<u64> {
        (self.read_ratelimit_mb > 0).then(|| u64::from(self.read_ratelimit_mb) * 1024 * 1024)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Options handed to the storage client collaborator
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: self.request_timeout(),
        }
    }
}

/// Connection settings for the underlying storage client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = S3UtilConfig::default();
        assert_eq!(config.read_ratelimit_mb, 50);
        assert_eq!(config.connect_timeout_ms, 60_000);
        assert_eq!(config.request_timeout_ms, 60_000);
        assert_eq!(config.read_ratelimit_bytes_per_sec(), Some(50 * 1024 * 1024));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = S3UtilConfig::from_toml_str(
            r#"
            bucket = "warehouse"
            read_ratelimit_mb = 0
            direct_io_buffer_n_pages = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.bucket, "warehouse");
        assert_eq!(config.read_ratelimit_bytes_per_sec(), None);
        assert_eq!(config.direct_io_buffer_n_pages, 16);
        assert_eq!(config.max_concurrent_downloads, 8);
    }

    #[test]
    fn test_validate_rejects_zero_pages() {
        let err = S3UtilConfig::from_toml_str("direct_io_buffer_n_pages = 0").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_oversized_buffer() {
        let err = S3UtilConfig::from_toml_str("direct_io_buffer_n_pages = 9223372036854775807")
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let config = S3UtilConfig {
            direct_io_buffer_n_pages: MAX_DIRECT_IO_BUFFER_N_PAGES,
            ..S3UtilConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bucket = \"logs\"\nrequest_timeout_ms = 1500").unwrap();

        let config = S3UtilConfig::load(file.path()).unwrap();
        assert_eq!(config.bucket, "logs");
        assert_eq!(
            config.client_options().request_timeout,
            Duration::from_millis(1500)
        );
    }
}
