//! Writer handles.

use std::sync::Arc;

use tracing::error;
use updatekit_errors::{Result, UpdateError};
use updatekit_stream::Writer;

use crate::store::BlobStore;

/// Copy `name` into `dest`.
///
/// Returns the name length. Fails `ResourceExhausted` after copying a
/// truncated prefix when `dest` is too small.
pub(crate) fn copy_file_name(name: &str, dest: &mut [u8]) -> Result<usize> {
    let bytes = name.as_bytes();
    let n = bytes.len().min(dest.len());
    dest[..n].copy_from_slice(&bytes[..n]);
    if n < bytes.len() {
        return Err(UpdateError::resource_exhausted(format!(
            "file name of {} bytes does not fit in {} byte buffer",
            bytes.len(),
            dest.len()
        )));
    }
    Ok(n)
}

/// Writes a new blob, committing whole flash chunks as data arrives.
///
/// Opening a writer discards the previous blob and its file name. The blob
/// becomes valid only after a successful [`close`](Self::close); a failed
/// close leaves it invalid and must not be retried. A writer that is dropped
/// while open is closed.
#[derive(Debug)]
pub struct BlobWriter {
    store: Arc<BlobStore>,
    open: bool,
}

impl BlobWriter {
    /// Create a closed writer for `store`.
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self { store, open: false }
    }

    /// Open for writing.
    ///
    /// # Errors
    ///
    /// `Unavailable` if this or another writer, or any reader, is open.
    /// `FailedPrecondition` if the store is not initialized.
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(UpdateError::unavailable("writer is already open"));
        }
        self.store.open_write()?;
        self.open = true;
        Ok(())
    }

    /// Flush, pad, checksum and persist the blob metadata.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if not open; `DataLoss` for any failure, which
    /// leaves the blob invalid.
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.open = false;
        self.store.close_write()
    }

    /// Whether the writer is open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Set the file name persisted with the blob at close.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if not open, `ResourceExhausted` if the name does
    /// not fit the metadata buffer.
    pub fn set_file_name(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.store.set_file_name(name)
    }

    /// The pending file name.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if not open, `NotFound` without a name.
    pub fn file_name(&self) -> Result<String> {
        self.ensure_open()?;
        self.store.file_name()
    }

    /// Copy the pending file name into `dest`, returning its length.
    ///
    /// # Errors
    ///
    /// As [`file_name`](Self::file_name), plus `ResourceExhausted` if `dest`
    /// is too small.
    pub fn get_file_name(&self, dest: &mut [u8]) -> Result<usize> {
        copy_file_name(&self.file_name()?, dest)
    }

    /// Erase the partition and restart the blob from empty. Clears a
    /// previous write failure.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if not open, `DataLoss` if the erase fails.
    pub fn erase(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.store.erase_for_writer()
    }

    /// Throw away everything written so far.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if not open.
    pub fn discard(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.store.discard()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(UpdateError::failed_precondition("writer is not open"))
        }
    }
}

impl Writer for BlobWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.store.write(data)
    }

    fn conservative_write_limit(&self) -> usize {
        if self.open {
            self.store.write_bytes_remaining()
        } else {
            0
        }
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.store.close_write() {
                error!(blob = %self.store.name(), error = %e, "implicit writer close failed");
            }
        }
    }
}

/// Writer that only buffers on write; data reaches flash on
/// [`flush`](Self::flush) or [`close`](Self::close).
///
/// The whole write buffer is usable, so a flush can commit several chunks at
/// once. Flushing commits only whole `flash_write_size_bytes` chunks.
#[derive(Debug)]
pub struct DeferredBlobWriter {
    inner: BlobWriter,
}

impl DeferredBlobWriter {
    /// Create a closed deferred writer for `store`.
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            inner: BlobWriter::new(store),
        }
    }

    /// See [`BlobWriter::open`].
    ///
    /// # Errors
    ///
    /// As [`BlobWriter::open`].
    pub fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    /// See [`BlobWriter::close`].
    ///
    /// # Errors
    ///
    /// As [`BlobWriter::close`].
    pub fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    /// Whether the writer is open.
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Append to the write buffer without touching flash.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if the buffer or the blob lacks room right now,
    /// `OutOfRange` once the blob is full, `DataLoss` after a write failure.
    pub fn add_to_write_buffer(&mut self, data: &[u8]) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.store.add_to_write_buffer(data)
    }

    /// Commit all whole chunks in the buffer.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if not open, `DataLoss` on flash failure.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.store.flush()
    }

    /// See [`BlobWriter::set_file_name`].
    ///
    /// # Errors
    ///
    /// As [`BlobWriter::set_file_name`].
    pub fn set_file_name(&mut self, name: &str) -> Result<()> {
        self.inner.set_file_name(name)
    }

    /// See [`BlobWriter::file_name`].
    ///
    /// # Errors
    ///
    /// As [`BlobWriter::file_name`].
    pub fn file_name(&self) -> Result<String> {
        self.inner.file_name()
    }

    /// See [`BlobWriter::get_file_name`].
    ///
    /// # Errors
    ///
    /// As [`BlobWriter::get_file_name`].
    pub fn get_file_name(&self, dest: &mut [u8]) -> Result<usize> {
        self.inner.get_file_name(dest)
    }

    /// See [`BlobWriter::erase`].
    ///
    /// # Errors
    ///
    /// As [`BlobWriter::erase`].
    pub fn erase(&mut self) -> Result<()> {
        self.inner.erase()
    }

    /// See [`BlobWriter::discard`].
    ///
    /// # Errors
    ///
    /// As [`BlobWriter::discard`].
    pub fn discard(&mut self) -> Result<()> {
        self.inner.discard()
    }
}

impl Writer for DeferredBlobWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.add_to_write_buffer(data)
    }

    fn conservative_write_limit(&self) -> usize {
        if self.inner.open {
            self.inner
                .store
                .write_buffer_bytes_free()
                .min(self.inner.store.write_bytes_remaining())
        } else {
            0
        }
    }
}
