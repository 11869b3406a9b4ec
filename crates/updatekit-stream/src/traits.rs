//! Stream traits.

use std::io::SeekFrom;

use updatekit_errors::{ErrorKind, Result, UpdateError};

/// A source of bytes.
pub trait Reader {
    /// Read up to `dest.len()` bytes.
    ///
    /// Returns a non-zero count unless `dest` is empty.
    ///
    /// # Errors
    ///
    /// `OutOfRange` at the end of the stream, `ResourceExhausted` when no
    /// data is available right now but may be later.
    fn read(&mut self, dest: &mut [u8]) -> Result<usize>;

    /// Number of bytes a `read` is guaranteed not to reject for lack of
    /// data right now. Conservative: the real amount may be larger.
    fn conservative_read_limit(&self) -> usize {
        usize::MAX
    }

    /// Fill `dest` completely.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if the stream ends first; other reader errors as-is.
    fn read_exact(&mut self, dest: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < dest.len() {
            let Some(rest) = dest.get_mut(filled..) else {
                break;
            };
            let n = self.read(rest)?;
            if n == 0 {
                return Err(UpdateError::internal("reader returned no bytes"));
            }
            filled += n;
        }
        Ok(())
    }

    /// Append everything up to the end of the stream to `out`.
    ///
    /// # Errors
    ///
    /// Any reader error other than the terminating `OutOfRange`.
    fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut chunk = [0u8; 256];
        let mut total = 0;
        loop {
            match self.read(&mut chunk) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    out.extend_from_slice(chunk.get(..n).unwrap_or_default());
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::OutOfRange => return Ok(total),
                Err(e) => return Err(e),
            }
        }
    }
}

/// A sink for bytes.
pub trait Writer {
    /// Write all of `data` or nothing.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if `data` does not fit right now, `OutOfRange`
    /// once the sink can accept no more data.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Number of bytes a `write` is guaranteed to accept right now.
    fn conservative_write_limit(&self) -> usize {
        usize::MAX
    }
}

/// Random access within a stream.
pub trait Seek {
    /// Move the cursor.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if the target position is outside the stream.
    fn seek(&mut self, pos: SeekFrom) -> Result<()>;

    /// Current cursor position.
    fn tell(&self) -> usize;
}

/// A reader that also supports seeking, shareable across threads.
pub trait SeekableReader: Reader + Seek + Send {}

impl<T: Reader + Seek + Send + ?Sized> SeekableReader for T {}

/// Resolve `pos` against a stream of `len` bytes whose cursor is at
/// `current`. Positions `0..=len` are valid.
///
/// # Errors
///
/// `OutOfRange` for a position before the start or past the end.
pub fn resolve_seek(pos: SeekFrom, current: usize, len: usize) -> Result<usize> {
    let target = match pos {
        SeekFrom::Start(offset) => i128::from(offset),
        SeekFrom::Current(delta) => current as i128 + i128::from(delta),
        SeekFrom::End(delta) => len as i128 + i128::from(delta),
    };
    if target < 0 || target > len as i128 {
        return Err(UpdateError::out_of_range(format!(
            "seek to {target} outside stream of {len} bytes"
        )));
    }
    usize::try_from(target).map_err(|e| UpdateError::out_of_range(e.to_string()))
}

impl<R: Reader + ?Sized> Reader for &mut R {
    fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        (**self).read(dest)
    }

    fn conservative_read_limit(&self) -> usize {
        (**self).conservative_read_limit()
    }
}

impl<R: Reader + ?Sized> Reader for Box<R> {
    fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        (**self).read(dest)
    }

    fn conservative_read_limit(&self) -> usize {
        (**self).conservative_read_limit()
    }
}

impl<S: Seek + ?Sized> Seek for Box<S> {
    fn seek(&mut self, pos: SeekFrom) -> Result<()> {
        (**self).seek(pos)
    }

    fn tell(&self) -> usize {
        (**self).tell()
    }
}

impl<W: Writer + ?Sized> Writer for &mut W {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn conservative_write_limit(&self) -> usize {
        (**self).conservative_write_limit()
    }
}

impl<W: Writer + ?Sized> Writer for Box<W> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn conservative_write_limit(&self) -> usize {
        (**self).conservative_write_limit()
    }
}

/// Unbounded in-memory sink.
impl Writer for Vec<u8> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_seek_bounds() {
        assert_eq!(resolve_seek(SeekFrom::Start(0), 3, 10).ok(), Some(0));
        assert_eq!(resolve_seek(SeekFrom::Start(10), 3, 10).ok(), Some(10));
        assert_eq!(resolve_seek(SeekFrom::Current(-3), 3, 10).ok(), Some(0));
        assert_eq!(resolve_seek(SeekFrom::End(-1), 3, 10).ok(), Some(9));
        assert!(resolve_seek(SeekFrom::Start(11), 0, 10).is_err());
        assert!(resolve_seek(SeekFrom::Current(-4), 3, 10).is_err());
        assert!(resolve_seek(SeekFrom::End(1), 0, 10).is_err());
    }

    #[test]
    fn test_vec_writer_appends() -> Result<()> {
        let mut sink = Vec::new();
        Writer::write(&mut sink, b"ab")?;
        Writer::write(&mut sink, b"cd")?;
        assert_eq!(sink, b"abcd");
        Ok(())
    }
}
