//! Sources a bundle can be opened from

use std::io::SeekFrom;
use std::sync::Arc;

use parking_lot::Mutex;
use updatekit_blob_store::{BlobReader, BlobStore};
use updatekit_errors::{Result, UpdateError};
use updatekit_stream::{MemoryReader, Seek, SeekableReader};

/// A reader that must be opened before use and can be shared with the
/// bounded payload readers handed out by the accessor.
pub trait OpenableReader: Send {
    /// Open the underlying source.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the source is held elsewhere (for a blob, by an
    /// open writer), or any source-specific error.
    fn open(&mut self) -> Result<()>;

    /// Close the underlying source.
    ///
    /// # Errors
    ///
    /// Source-specific.
    fn close(&mut self) -> Result<()>;

    /// Whether the source is open.
    fn is_open(&self) -> bool;

    /// Shared handle to the seekable source.
    fn source(&self) -> Arc<Mutex<dyn SeekableReader>>;
}

/// Opens a bundle staged in a [`BlobStore`].
#[derive(Debug)]
pub struct BlobStoreOpenableReader {
    reader: Arc<Mutex<BlobReader>>,
}

impl BlobStoreOpenableReader {
    /// Wrap `store`.
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            reader: Arc::new(Mutex::new(BlobReader::new(store))),
        }
    }
}

impl OpenableReader for BlobStoreOpenableReader {
    fn open(&mut self) -> Result<()> {
        self.reader.lock().open()
    }

    fn close(&mut self) -> Result<()> {
        self.reader.lock().close()
    }

    fn is_open(&self) -> bool {
        self.reader.lock().is_open()
    }

    fn source(&self) -> Arc<Mutex<dyn SeekableReader>> {
        self.reader.clone()
    }
}

/// Opens a bundle held in memory. Used by tooling and tests.
#[derive(Debug)]
pub struct MemoryOpenableReader {
    reader: Arc<Mutex<MemoryReader>>,
    open: bool,
}

impl MemoryOpenableReader {
    /// Wrap `bundle`.
    pub fn new(bundle: impl Into<Vec<u8>>) -> Self {
        Self {
            reader: Arc::new(Mutex::new(MemoryReader::new(bundle))),
            open: false,
        }
    }
}

impl OpenableReader for MemoryOpenableReader {
    fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(UpdateError::unavailable("bundle reader is already open"));
        }
        self.reader.lock().seek(SeekFrom::Start(0))?;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn source(&self) -> Arc<Mutex<dyn SeekableReader>> {
        self.reader.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updatekit_errors::ErrorKind;

    #[test]
    fn test_memory_reader_rejects_double_open() -> Result<()> {
        let mut reader = MemoryOpenableReader::new(b"bundle".to_vec());
        reader.open()?;
        assert_eq!(reader.open().err().map(|e| e.kind()), Some(ErrorKind::Unavailable));
        reader.close()?;
        reader.open()?;
        assert!(reader.is_open());
        Ok(())
    }

    #[test]
    fn test_source_is_shared() -> Result<()> {
        let mut reader = MemoryOpenableReader::new(b"abc".to_vec());
        reader.open()?;
        let source = reader.source();
        let mut buf = [0u8; 3];
        source.lock().read_exact(&mut buf)?;
        assert_eq!(&buf, b"abc");
        Ok(())
    }
}
