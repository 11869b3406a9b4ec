//! Reader handle.

use std::io::SeekFrom;
use std::sync::Arc;

use updatekit_errors::{Result, UpdateError};
use updatekit_stream::{Reader, Seek, resolve_seek};

use crate::store::BlobStore;
use crate::writer::copy_file_name;

/// Reads a committed blob. Any number of readers may be open at once, but
/// never while a writer is open. Each reader keeps its own offset.
#[derive(Debug)]
pub struct BlobReader {
    store: Arc<BlobStore>,
    open: bool,
    offset: usize,
}

impl BlobReader {
    /// Create a closed reader for `store`.
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            store,
            open: false,
            offset: 0,
        }
    }

    /// Open at the start of the blob.
    ///
    /// # Errors
    ///
    /// As [`open_at`](Self::open_at).
    pub fn open(&mut self) -> Result<()> {
        self.open_at(0)
    }

    /// Open at `offset`.
    ///
    /// # Errors
    ///
    /// `Unavailable` if this reader is already open or a writer is open,
    /// `FailedPrecondition` without valid data, `InvalidArgument` if
    /// `offset` is at or past the end of the data.
    pub fn open_at(&mut self, offset: usize) -> Result<()> {
        if self.open {
            return Err(UpdateError::unavailable("reader is already open"));
        }
        self.store.open_read(offset)?;
        self.open = true;
        self.offset = offset;
        Ok(())
    }

    /// Release the reader.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if not open.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Err(UpdateError::failed_precondition("reader is not open"));
        }
        self.open = false;
        self.store.close_read();
        Ok(())
    }

    /// Whether the reader is open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Size of the readable blob.
    pub fn readable_data_bytes(&self) -> usize {
        self.store.readable_data_bytes()
    }

    /// The persisted file name.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if not open, `NotFound` without a name.
    pub fn file_name(&self) -> Result<String> {
        if !self.open {
            return Err(UpdateError::failed_precondition("reader is not open"));
        }
        self.store.file_name()
    }

    /// Copy the persisted file name into `dest`, returning its length.
    ///
    /// # Errors
    ///
    /// As [`file_name`](Self::file_name), plus `ResourceExhausted` if `dest`
    /// is too small.
    pub fn get_file_name(&self, dest: &mut [u8]) -> Result<usize> {
        copy_file_name(&self.file_name()?, dest)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }
}

impl Reader for BlobReader {
    fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(UpdateError::failed_precondition("reader is not open"));
        }
        if dest.is_empty() {
            return Ok(0);
        }
        let n = self.store.read_at(self.offset, dest)?;
        self.offset += n;
        Ok(n)
    }

    fn conservative_read_limit(&self) -> usize {
        if self.open {
            self.store.readable_data_bytes().saturating_sub(self.offset)
        } else {
            0
        }
    }
}

impl Seek for BlobReader {
    fn seek(&mut self, pos: SeekFrom) -> Result<()> {
        if !self.open {
            return Err(UpdateError::failed_precondition("reader is not open"));
        }
        self.offset = resolve_seek(pos, self.offset, self.store.readable_data_bytes())?;
        Ok(())
    }

    fn tell(&self) -> usize {
        self.offset
    }
}

impl Drop for BlobReader {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            self.store.close_read();
        }
    }
}
