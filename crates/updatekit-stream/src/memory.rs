//! In-memory readers and writers.

use std::io::SeekFrom;

use updatekit_errors::{Result, UpdateError};

use crate::traits::{Reader, Seek, Writer, resolve_seek};

/// Seekable reader over an owned byte buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    data: Vec<u8>,
    position: usize,
}

impl MemoryReader {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    /// Total size of the underlying buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take back the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Reader for MemoryReader {
    fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }
        let remaining = self.data.get(self.position..).unwrap_or_default();
        if remaining.is_empty() {
            return Err(UpdateError::out_of_range("end of memory stream"));
        }
        let n = dest.len().min(remaining.len());
        dest[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }

    fn conservative_read_limit(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }
}

impl Seek for MemoryReader {
    fn seek(&mut self, pos: SeekFrom) -> Result<()> {
        self.position = resolve_seek(pos, self.position, self.data.len())?;
        Ok(())
    }

    fn tell(&self) -> usize {
        self.position
    }
}

/// Writer into a buffer with a fixed capacity.
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    data: Vec<u8>,
    capacity: usize,
}

impl MemoryWriter {
    /// Create an empty writer that accepts at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop everything written so far.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Take the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Writer for MemoryWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let remaining = self.conservative_write_limit();
        if remaining == 0 {
            return Err(UpdateError::out_of_range("memory writer is full"));
        }
        if data.len() > remaining {
            return Err(UpdateError::resource_exhausted(format!(
                "{} bytes do not fit in {remaining} remaining",
                data.len()
            )));
        }
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn conservative_write_limit(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updatekit_errors::ErrorKind;

    #[test]
    fn test_reader_end_is_out_of_range() -> Result<()> {
        let mut r = MemoryReader::new(b"abc".to_vec());
        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf)?, 3);
        assert_eq!(&buf[..3], b"abc");
        let err = r.read(&mut buf).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::OutOfRange));
        assert_eq!(r.read(&mut [])?, 0);
        Ok(())
    }

    #[test]
    fn test_writer_capacity() -> Result<()> {
        let mut w = MemoryWriter::new(4);
        w.write(b"ab")?;
        assert_eq!(
            w.write(b"cde").err().map(|e| e.kind()),
            Some(ErrorKind::ResourceExhausted)
        );
        w.write(b"cd")?;
        assert_eq!(
            w.write(b"e").err().map(|e| e.kind()),
            Some(ErrorKind::OutOfRange)
        );
        assert_eq!(w.as_bytes(), b"abcd");
        Ok(())
    }
}
