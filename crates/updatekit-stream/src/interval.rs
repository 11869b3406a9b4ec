//! Bounded views over a shared seekable source.

use std::io::SeekFrom;
use std::sync::Arc;

use parking_lot::Mutex;
use updatekit_errors::{Result, UpdateError};

use crate::traits::{Reader, Seek, SeekableReader, resolve_seek};

/// Reads the byte range `[start, end)` of a shared source.
///
/// Each interval reader keeps its own cursor and re-seeks the source before
/// every read, so several intervals over one source can be used in any
/// interleaving. Positions reported by [`Seek::tell`] are relative to
/// `start`.
pub struct IntervalReader<R: SeekableReader + ?Sized> {
    source: Arc<Mutex<R>>,
    start: usize,
    end: usize,
    current: usize,
}

impl<R: SeekableReader + ?Sized> IntervalReader<R> {
    /// Create a reader over `[start, end)` of `source`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `start > end`.
    pub fn new(source: Arc<Mutex<R>>, start: usize, end: usize) -> Result<Self> {
        if start > end {
            return Err(UpdateError::invalid_argument(format!(
                "interval start {start} is past end {end}"
            )));
        }
        Ok(Self {
            source,
            start,
            end,
            current: start,
        })
    }

    /// Absolute offset of the first byte in the source.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Absolute offset one past the last byte in the source.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of bytes in the interval.
    pub fn interval_size(&self) -> usize {
        self.end - self.start
    }

    /// Rewind to the start of the interval.
    pub fn reset(&mut self) {
        self.current = self.start;
    }

    /// The shared source.
    pub fn source(&self) -> &Arc<Mutex<R>> {
        &self.source
    }
}

impl<R: SeekableReader + ?Sized> Clone for IntervalReader<R> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            start: self.start,
            end: self.end,
            current: self.current,
        }
    }
}

impl<R: SeekableReader + ?Sized> std::fmt::Debug for IntervalReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalReader")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("current", &self.current)
            .finish()
    }
}

impl<R: SeekableReader + ?Sized> Reader for IntervalReader<R> {
    fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }
        if self.current >= self.end {
            return Err(UpdateError::out_of_range("end of interval"));
        }
        let want = dest.len().min(self.end - self.current);
        let mut source = self.source.lock();
        source.seek(SeekFrom::Start(self.current as u64))?;
        let n = source.read(&mut dest[..want])?;
        self.current += n;
        Ok(n)
    }

    fn conservative_read_limit(&self) -> usize {
        self.end - self.current
    }
}

impl<R: SeekableReader + ?Sized> Seek for IntervalReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> Result<()> {
        let relative = resolve_seek(pos, self.current - self.start, self.interval_size())?;
        self.current = self.start + relative;
        Ok(())
    }

    fn tell(&self) -> usize {
        self.current - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryReader;
    use updatekit_errors::ErrorKind;

    fn shared(data: &[u8]) -> Arc<Mutex<MemoryReader>> {
        Arc::new(Mutex::new(MemoryReader::new(data.to_vec())))
    }

    #[test]
    fn test_rejects_inverted_interval() {
        assert!(IntervalReader::new(shared(b"abc"), 2, 1).is_err());
    }

    #[test]
    fn test_interleaved_intervals_keep_own_cursor() -> Result<()> {
        let src = shared(b"0123456789");
        let mut a = IntervalReader::new(Arc::clone(&src), 0, 5)?;
        let mut b = IntervalReader::new(src, 5, 10)?;
        let mut buf = [0u8; 2];
        a.read(&mut buf)?;
        assert_eq!(&buf, b"01");
        b.read(&mut buf)?;
        assert_eq!(&buf, b"56");
        a.read(&mut buf)?;
        assert_eq!(&buf, b"23");
        assert_eq!(a.tell(), 4);
        assert_eq!(b.conservative_read_limit(), 3);
        Ok(())
    }

    #[test]
    fn test_seek_relative_to_interval() -> Result<()> {
        let mut r = IntervalReader::new(shared(b"xxhelloyy"), 2, 7)?;
        r.seek(SeekFrom::End(-2))?;
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf)?, 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(
            r.read(&mut buf).err().map(|e| e.kind()),
            Some(ErrorKind::OutOfRange)
        );
        assert!(r.seek(SeekFrom::Start(6)).is_err());
        Ok(())
    }

    #[test]
    fn test_empty_interval() -> Result<()> {
        let mut r = IntervalReader::new(shared(b"abc"), 1, 1)?;
        assert_eq!(r.interval_size(), 0);
        let mut buf = [0u8; 1];
        assert!(r.read(&mut buf).is_err());
        Ok(())
    }
}
