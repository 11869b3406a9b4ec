//! Checksum algorithms for blob integrity.

/// Incremental checksum over the logical blob bytes.
pub trait ChecksumAlgorithm: Send {
    /// Restart from an empty input.
    fn reset(&mut self);

    /// Feed more bytes.
    fn update(&mut self, data: &[u8]);

    /// Checksum of everything fed since the last reset. Does not reset.
    fn finish(&self) -> u32;
}

/// CRC-32 (IEEE) checksum.
#[derive(Debug, Clone, Default)]
pub struct Crc32Checksum {
    hasher: crc32fast::Hasher,
}

impl Crc32Checksum {
    /// Fresh checksum state.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChecksumAlgorithm for Crc32Checksum {
    fn reset(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finish(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}
