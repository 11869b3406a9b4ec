//! Flash partition abstraction and an in-memory implementation.

use tracing::trace;
use updatekit_errors::{Result, UpdateError};

/// A contiguous, erasable region of flash memory.
///
/// Writes must start on and span whole multiples of
/// [`alignment_bytes`](FlashPartition::alignment_bytes), and may only
/// target erased bytes.
pub trait FlashPartition: Send {
    /// Total partition size.
    fn size_bytes(&self) -> usize;

    /// Minimum program unit.
    fn alignment_bytes(&self) -> usize;

    /// Value every byte holds after an erase.
    fn erased_value(&self) -> u8 {
        0xFF
    }

    /// Read `dest.len()` bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if the read runs past the partition end.
    fn read(&mut self, address: usize, dest: &mut [u8]) -> Result<()>;

    /// Program `data` at `address`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for misaligned address or length, `OutOfRange` past
    /// the partition end, `DataLoss` if the hardware write fails.
    fn write(&mut self, address: usize, data: &[u8]) -> Result<()>;

    /// Erase the whole partition.
    ///
    /// # Errors
    ///
    /// `DataLoss` if the hardware erase fails.
    fn erase(&mut self) -> Result<()>;

    /// Whether every byte holds the erased value.
    ///
    /// # Errors
    ///
    /// Any read error.
    fn is_erased(&mut self) -> Result<bool> {
        let erased = self.erased_value();
        let size = self.size_bytes();
        let mut chunk = [0u8; 64];
        let mut address = 0;
        while address < size {
            let len = chunk.len().min(size - address);
            let dest = &mut chunk[..len];
            self.read(address, dest)?;
            if dest.iter().any(|b| *b != erased) {
                return Ok(false);
            }
            address += len;
        }
        Ok(true)
    }
}

/// RAM-backed flash partition with fault injection for tests and host tools.
#[derive(Debug, Clone)]
pub struct InMemoryFlashPartition {
    data: Vec<u8>,
    alignment: usize,
    erased_value: u8,
    writes_before_failure: Option<usize>,
    fail_erase: bool,
    fail_reads: bool,
    write_count: usize,
    erase_count: usize,
}

impl InMemoryFlashPartition {
    /// Create an erased partition.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `alignment` is zero or does not divide `size`.
    pub fn new(size: usize, alignment: usize) -> Result<Self> {
        if alignment == 0 || !size.is_multiple_of(alignment) {
            return Err(UpdateError::invalid_argument(format!(
                "partition size {size} is not a multiple of alignment {alignment}"
            )));
        }
        Ok(Self {
            data: vec![0xFF; size],
            alignment,
            erased_value: 0xFF,
            writes_before_failure: None,
            fail_erase: false,
            fail_reads: false,
            write_count: 0,
            erase_count: 0,
        })
    }

    /// Let `n` more writes succeed, then fail every write with `DataLoss`.
    pub fn inject_write_failure_after(&mut self, n: usize) {
        self.writes_before_failure = Some(n);
    }

    /// Make erases fail with `DataLoss`.
    pub fn inject_erase_failure(&mut self, fail: bool) {
        self.fail_erase = fail;
    }

    /// Make reads fail with `DataLoss`.
    pub fn inject_read_failure(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Remove all injected faults.
    pub fn clear_faults(&mut self) {
        self.writes_before_failure = None;
        self.fail_erase = false;
        self.fail_reads = false;
    }

    /// Overwrite one byte, bypassing the erase rules. Simulates bit rot.
    pub fn corrupt(&mut self, address: usize, value: u8) {
        if let Some(byte) = self.data.get_mut(address) {
            *byte = value;
        }
    }

    /// Raw partition contents.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Number of successful erases.
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    fn check_bounds(&self, address: usize, len: usize) -> Result<()> {
        match address.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(UpdateError::out_of_range(format!(
                "access of {len} bytes at {address} exceeds partition of {} bytes",
                self.data.len()
            ))),
        }
    }
}

impl FlashPartition for InMemoryFlashPartition {
    fn size_bytes(&self) -> usize {
        self.data.len()
    }

    fn alignment_bytes(&self) -> usize {
        self.alignment
    }

    fn erased_value(&self) -> u8 {
        self.erased_value
    }

    fn read(&mut self, address: usize, dest: &mut [u8]) -> Result<()> {
        if self.fail_reads {
            return Err(UpdateError::data_loss("injected flash read failure"));
        }
        self.check_bounds(address, dest.len())?;
        dest.copy_from_slice(&self.data[address..address + dest.len()]);
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<()> {
        if !address.is_multiple_of(self.alignment) || !data.len().is_multiple_of(self.alignment) {
            return Err(UpdateError::invalid_argument(format!(
                "write of {} bytes at {address} is not {}-byte aligned",
                data.len(),
                self.alignment
            )));
        }
        self.check_bounds(address, data.len())?;
        match self.writes_before_failure {
            Some(0) => return Err(UpdateError::data_loss("injected flash write failure")),
            Some(n) => self.writes_before_failure = Some(n - 1),
            None => {}
        }
        let erased = self.erased_value;
        let target = &mut self.data[address..address + data.len()];
        if target.iter().any(|b| *b != erased) {
            return Err(UpdateError::data_loss(format!(
                "write at {address} targets unerased flash"
            )));
        }
        target.copy_from_slice(data);
        self.write_count += 1;
        trace!(address, len = data.len(), "flash write");
        Ok(())
    }

    fn erase(&mut self) -> Result<()> {
        if self.fail_erase {
            return Err(UpdateError::data_loss("injected flash erase failure"));
        }
        self.data.fill(self.erased_value);
        self.erase_count += 1;
        trace!(size = self.data.len(), "flash erase");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updatekit_errors::ErrorKind;

    #[test]
    fn test_rejects_misaligned_write() -> Result<()> {
        let mut p = InMemoryFlashPartition::new(64, 8)?;
        let err = p.write(4, &[0u8; 8]).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
        let err = p.write(0, &[0u8; 6]).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
        Ok(())
    }

    #[test]
    fn test_rejects_write_to_unerased() -> Result<()> {
        let mut p = InMemoryFlashPartition::new(16, 8)?;
        p.write(0, &[1u8; 8])?;
        assert!(p.write(0, &[2u8; 8]).is_err());
        p.erase()?;
        p.write(0, &[2u8; 8])?;
        assert_eq!(&p.contents()[..8], &[2u8; 8]);
        Ok(())
    }

    #[test]
    fn test_injected_write_failure() -> Result<()> {
        let mut p = InMemoryFlashPartition::new(32, 8)?;
        p.inject_write_failure_after(1);
        p.write(0, &[0u8; 8])?;
        let err = p.write(8, &[0u8; 8]).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::DataLoss));
        Ok(())
    }

    #[test]
    fn test_is_erased() -> Result<()> {
        let mut p = InMemoryFlashPartition::new(128, 4)?;
        assert!(p.is_erased()?);
        p.write(124, &[0u8; 4])?;
        assert!(!p.is_erased()?);
        Ok(())
    }
}
