//! Direct I/O file writer
//!
//! Persists downloaded bytes while bypassing the OS page cache:
//! - Linux: O_DIRECT flag
//! - macOS: F_NOCACHE fcntl
//!
//! Unbuffered writes must start at an aligned offset, come from an aligned
//! buffer and cover whole pages. [`DirectFileWriter`] hides that behind an
//! append-only `write` by staging bytes in an [`AlignedBuffer`] and only
//! handing complete pages to the kernel. The final partial page is padded
//! with zeros and the file is then truncated back to the logical length.

use s3util_common::{Error, Result};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::fs::File;
#[cfg(any(target_os = "linux", target_os = "macos"))]
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

/// Fallback alignment when the page size cannot be queried
pub const ALIGNMENT: usize = 4096;

/// Page size of the running system, used as the direct I/O block size
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size)
        .ok()
        .filter(|s| s.is_power_of_two() && *s >= 512)
        .unwrap_or(ALIGNMENT)
}

/// Aligned buffer for direct I/O operations
///
/// The start address and the length are both multiples of the alignment.
/// Memory is zeroed on allocation.
pub(crate) struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the buffer exclusively owns its allocation, like a Vec<u8>.
unsafe impl Send for AlignedBuffer {}
// SAFETY: shared access only hands out immutable slices.
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate at least `size` bytes aligned to `alignment`
    ///
    /// The size is rounded up to a whole number of alignment units, and is
    /// never smaller than one unit. Fails with `InvalidInput` when the
    /// alignment is not a power of two or the size cannot be laid out, and
    /// with `OutOfMemory` when the allocator refuses.
    fn with_alignment(size: usize, alignment: usize) -> io::Result<Self> {
        let invalid = || {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot lay out {size} bytes aligned to {alignment}"),
            )
        };
        if !alignment.is_power_of_two() {
            return Err(invalid());
        }
        let aligned_size = size
            .max(1)
            .div_ceil(alignment)
            .checked_mul(alignment)
            .ok_or_else(invalid)?;
        let layout = Layout::from_size_align(aligned_size, alignment).map_err(|_| invalid())?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("failed to allocate {aligned_size} bytes"),
            )
        })?;

        Ok(Self { ptr, layout })
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for layout.size() bytes and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn len(&self) -> usize {
        self.layout.size()
    }

    fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len())
            .field("alignment", &self.alignment())
            .finish()
    }
}

/// Open `path` for unbuffered writing, creating or truncating it
#[cfg(any(target_os = "linux", target_os = "macos"))]
fn open_direct(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(target_os = "linux")]
    {
        options.custom_flags(libc::O_DIRECT);
    }

    let file = options.open(path).map_err(|source| {
        // Filesystems without O_DIRECT support reject the flag at open time
        if source.raw_os_error() == Some(libc::EINVAL) {
            Error::DirectIoUnsupported {
                path: path.to_path_buf(),
            }
        } else {
            Error::Open {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    #[cfg(target_os = "macos")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is open for the lifetime of `file`.
        if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) } == -1 {
            return Err(Error::DirectIoUnsupported {
                path: path.to_path_buf(),
            });
        }
    }

    Ok(file)
}

/// No page-cache bypass is available on this platform
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn open_direct(path: &Path) -> Result<File> {
    Err(Error::DirectIoUnsupported {
        path: path.to_path_buf(),
    })
}

/// A write-only file which uses direct I/O under the hood
///
/// Not `Clone`: the buffer offset and the file position must move together.
/// Closing (via [`finish`](Self::finish) or drop) flushes the partial tail page
/// and truncates the file to [`total_bytes_written`](Self::total_bytes_written).
///
/// After a failed page write the writer is poisoned: further writes fail,
/// the count drops back to the bytes already on disk, and closing only
/// truncates the file to that length.
pub struct DirectFileWriter {
    file: File,
    path: PathBuf,
    buffer: AlignedBuffer,
    /// Bytes staged in `buffer`, always below `buffer.len()` between writes
    offset: usize,
    page_size: usize,
    /// Logical bytes accepted from callers
    total_bytes_written: u64,
    /// Logical bytes known to be on disk
    persisted: u64,
    failed: bool,
    closed: bool,
}

impl DirectFileWriter {
    /// Create (or truncate) `path` with a buffer of `n_pages` pages
    ///
    /// The buffer is allocated before the file is touched, so an unusable
    /// `n_pages` fails with [`Error::Configuration`] and leaves no file.
    pub fn create(path: impl AsRef<Path>, n_pages: usize) -> Result<Self> {
        let path = path.as_ref();
        let page_size = page_size();
        let buffer_bytes = n_pages.max(1).checked_mul(page_size).ok_or_else(|| {
            Error::configuration(format!("direct I/O buffer of {n_pages} pages is too large"))
        })?;
        let buffer = AlignedBuffer::with_alignment(buffer_bytes, page_size).map_err(|e| {
            Error::configuration(format!("direct I/O buffer of {n_pages} pages: {e}"))
        })?;
        let file = open_direct(path)?;

        debug!(
            path = %path.display(),
            buffer_bytes = buffer.len(),
            "opened direct I/O file"
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            buffer,
            offset: 0,
            page_size,
            total_bytes_written: 0,
            persisted: 0,
            failed: false,
            closed: false,
        })
    }

    /// Append `data`, returning the number of bytes consumed
    ///
    /// Either all of `data` is accepted or the call fails with
    /// [`Error::Write`]; there are no short writes.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.failed {
            return Err(Error::Write {
                path: self.path.clone(),
                source: io::Error::other("an earlier direct I/O write failed"),
            });
        }

        let mut remaining = data;
        while !remaining.is_empty() {
            let n = (self.buffer.len() - self.offset).min(remaining.len());
            self.buffer.as_mut_slice()[self.offset..self.offset + n]
                .copy_from_slice(&remaining[..n]);
            self.offset += n;
            self.total_bytes_written += n as u64;
            remaining = &remaining[n..];

            if self.offset == self.buffer.len()
                && let Err(e) = self.flush_full_pages()
            {
                self.failed = true;
                self.offset = 0;
                self.total_bytes_written = self.persisted;
                return Err(e);
            }
        }

        Ok(data.len())
    }

    /// Flush every complete page and move the sub-page tail to the front
    fn flush_full_pages(&mut self) -> Result<()> {
        let full = self.offset - self.offset % self.page_size;
        if full == 0 {
            return Ok(());
        }

        self.write_aligned(full)?;
        self.persisted += full as u64;
        self.buffer.as_mut_slice().copy_within(full..self.offset, 0);
        self.offset -= full;
        Ok(())
    }

    /// Write the first `len` buffer bytes; `len` must be page aligned
    fn write_aligned(&self, len: usize) -> Result<()> {
        debug_assert_eq!(len % self.page_size, 0);
        let data = &self.buffer.as_slice()[..len];
        (&self.file).write_all(data).map_err(|source| Error::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Flush the tail page and truncate to the logical size
    ///
    /// Truncation runs even when the tail write fails, in which case the file
    /// keeps only the pages that were written successfully.
    fn close_inner(&mut self) -> Result<u64> {
        if self.closed {
            return Ok(self.persisted);
        }
        self.closed = true;

        let mut tail_result = Ok(());
        if self.offset > 0 && !self.failed {
            let padded = self.offset.next_multiple_of(self.page_size);
            self.buffer.as_mut_slice()[self.offset..padded].fill(0);
            tail_result = self.write_aligned(padded);
            if tail_result.is_ok() {
                self.persisted = self.total_bytes_written;
            }
        }
        self.offset = 0;

        let truncate_result = self
            .file
            .set_len(self.persisted)
            .map_err(|source| Error::Write {
                path: self.path.clone(),
                source,
            });

        tail_result?;
        truncate_result?;
        debug!(
            path = %self.path.display(),
            bytes = self.persisted,
            "closed direct I/O file"
        );
        Ok(self.persisted)
    }

    /// Close the file, reporting tail flush or truncation failures
    ///
    /// Returns the file length, which equals
    /// [`total_bytes_written`](Self::total_bytes_written) on success.
    pub fn finish(mut self) -> Result<u64> {
        self.close_inner()
    }

    /// Logical bytes accepted so far
    #[must_use]
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// Size of the staging buffer in bytes
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirectFileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            warn!(path = %self.path.display(), error = %e, "failed to close direct I/O file");
        }
    }
}

impl std::fmt::Debug for DirectFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectFileWriter")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("total_bytes_written", &self.total_bytes_written)
            .finish_non_exhaustive()
    }
}

/// Stream adapter over a [`DirectFileWriter`]
///
/// Holds the writer exclusively and exposes it through `std::io::Write`.
/// Reading is not supported; `read` always fails with
/// [`io::ErrorKind::Unsupported`].
#[derive(Debug)]
pub struct DirectFileSink {
    writer: DirectFileWriter,
}

impl DirectFileSink {
    /// Create a sink writing to `path` with a buffer of `n_pages` pages
    pub fn create(path: impl AsRef<Path>, n_pages: usize) -> Result<Self> {
        DirectFileWriter::create(path, n_pages).map(Self::new)
    }

    #[must_use]
    pub fn new(writer: DirectFileWriter) -> Self {
        Self { writer }
    }

    #[must_use]
    pub fn get_ref(&self) -> &DirectFileWriter {
        &self.writer
    }

    #[must_use]
    pub fn into_inner(self) -> DirectFileWriter {
        self.writer
    }

    /// Close the underlying writer
    pub fn finish(self) -> Result<u64> {
        self.writer.finish()
    }
}

impl Write for DirectFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf).map_err(io::Error::other)
    }

    /// Partial pages stay buffered until the sink is closed
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for DirectFileSink {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "direct I/O sink is write-only",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};

    fn create_or_skip(path: &Path, n_pages: usize) -> Option<DirectFileWriter> {
        match DirectFileWriter::create(path, n_pages) {
            Ok(writer) => Some(writer),
            Err(Error::DirectIoUnsupported { .. }) => {
                eprintln!("direct I/O unsupported on temp filesystem, skipping");
                None
            }
            Err(e) => panic!("failed to create writer: {e}"),
        }
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        data
    }

    /// Write `data` in random-sized chunks and return the persisted bytes
    fn write_in_chunks(data: &[u8], n_pages: usize) -> Option<Vec<u8>> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.bin");
        let mut writer = create_or_skip(&path, n_pages)?;

        let mut rng = rand::thread_rng();
        let mut rest = data;
        while !rest.is_empty() {
            let n = rng.gen_range(1..=rest.len().min(3 * page_size()));
            assert_eq!(writer.write(&rest[..n]).unwrap(), n);
            rest = &rest[n..];
        }
        assert_eq!(writer.total_bytes_written(), data.len() as u64);
        assert_eq!(writer.finish().unwrap(), data.len() as u64);

        Some(std::fs::read(&path).unwrap())
    }

    #[test]
    fn test_aligned_buffer() {
        let mut buf = AlignedBuffer::with_alignment(100, ALIGNMENT).unwrap();
        assert_eq!(buf.len(), ALIGNMENT);
        assert_eq!(buf.as_slice().as_ptr() as usize % ALIGNMENT, 0);
        assert!(buf.as_slice().iter().all(|b| *b == 0));

        buf.as_mut_slice()[..5].copy_from_slice(b"hello");
        assert_eq!(&buf.as_slice()[..5], b"hello");
    }

    #[test]
    fn test_aligned_buffer_rounds_up() {
        let buf = AlignedBuffer::with_alignment(4097, 512).unwrap();
        assert_eq!(buf.len(), 4608);
        assert_eq!(buf.alignment(), 512);
        assert_eq!(AlignedBuffer::with_alignment(0, 512).unwrap().len(), 512);
    }

    #[test]
    fn test_aligned_buffer_rejects_bad_layouts() {
        for (size, alignment) in [(4096, 0), (4096, 3), (usize::MAX, 4096)] {
            let err = AlignedBuffer::with_alignment(size, alignment).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_oversized_buffer_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.bin");

        for n_pages in [usize::MAX, usize::MAX / page_size()] {
            let err = DirectFileWriter::create(&path, n_pages).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{n_pages}: {err}");
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn test_size_and_content_for_page_boundaries() {
        let page = page_size();
        for len in [0, 1, page - 1, page, page + 1, 3 * page + 17] {
            for n_pages in [1, 4] {
                let data = random_bytes(len);
                let Some(persisted) = write_in_chunks(&data, n_pages) else {
                    return;
                };
                assert_eq!(persisted.len(), len, "len {len}, {n_pages} pages");
                assert_eq!(persisted, data, "len {len}, {n_pages} pages");
            }
        }
    }

    #[test]
    fn test_drop_truncates_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.bin");
        let data = random_bytes(page_size() + 123);

        {
            let Some(mut writer) = create_or_skip(&path, 2) else {
                return;
            };
            writer.write(&data).unwrap();
        }

        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.bin");
        std::fs::write(&path, vec![7u8; 3 * page_size()]).unwrap();

        let Some(mut writer) = create_or_skip(&path, 1) else {
            return;
        };
        writer.write(b"short").unwrap();
        writer.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }

    #[test]
    fn test_create_missing_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("object.bin");

        let err = DirectFileWriter::create(&path, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::Open { .. } | Error::DirectIoUnsupported { .. }
        ));
    }

    #[test]
    fn test_failed_write_poisons_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poisoned.bin");
        let Some(mut writer) = create_or_skip(&path, 1) else {
            return;
        };
        let page = page_size();
        let first = random_bytes(page);
        writer.write(&first).unwrap();

        // A read-only handle makes the next page write fail
        writer.file = File::open(&path).unwrap();
        let err = writer.write(&random_bytes(page + 10)).unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert_eq!(writer.total_bytes_written(), page as u64);
        assert!(writer.write(b"x").is_err());

        writer.file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        assert_eq!(writer.finish().unwrap(), page as u64);
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    #[test]
    fn test_create_is_unsupported_without_cache_bypass() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectFileWriter::create(dir.path().join("object.bin"), 1).unwrap_err();
        assert!(matches!(err, Error::DirectIoUnsupported { .. }));
    }

    #[test]
    fn test_sink_write_and_read_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink.bin");
        let Some(writer) = create_or_skip(&path, 1) else {
            return;
        };
        let mut sink = DirectFileSink::new(writer);

        let data = random_bytes(2 * page_size() + 5);
        io::copy(&mut data.as_slice(), &mut sink).unwrap();
        sink.flush().unwrap();

        let mut buf = [0u8; 8];
        let err = sink.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        assert_eq!(sink.finish().unwrap(), data.len() as u64);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }
}
