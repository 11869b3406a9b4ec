//! On-KVS blob metadata record.
//!
//! Layout (little-endian): `checksum: u32`, `data_size_bytes: u32`,
//! `file_name_length: u8`, `version: u8`, then the file name bytes.

use updatekit_errors::{Result, UpdateError};

/// Size of the fixed part of the record.
pub const METADATA_HEADER_SIZE: usize = 10;

/// Current record version.
pub const METADATA_VERSION: u8 = 1;

/// Metadata stored alongside a committed blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobMetadata {
    /// Checksum of the logical blob bytes, or 0 without a checksum algorithm.
    pub checksum: u32,
    /// Logical blob length.
    pub data_size_bytes: u32,
    /// Optional file name.
    pub file_name: Option<String>,
}

impl BlobMetadata {
    /// Serialize the record.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` if the file name is longer than 255 bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let name = self.file_name.as_deref().unwrap_or_default().as_bytes();
        let name_len = u8::try_from(name.len()).map_err(|e| {
            UpdateError::resource_exhausted(format!("file name of {} bytes: {e}", name.len()))
        })?;
        let mut out = Vec::with_capacity(METADATA_HEADER_SIZE + name.len());
        out.extend_from_slice(&self.checksum.to_le_bytes());
        out.extend_from_slice(&self.data_size_bytes.to_le_bytes());
        out.push(name_len);
        out.push(METADATA_VERSION);
        out.extend_from_slice(name);
        Ok(out)
    }

    /// Parse a record.
    ///
    /// # Errors
    ///
    /// `DataLoss` for a truncated record, unknown version, or a name that is
    /// not valid UTF-8.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (header, name) = bytes
            .split_at_checked(METADATA_HEADER_SIZE)
            .ok_or_else(|| UpdateError::data_loss("metadata record truncated"))?;
        let &[c0, c1, c2, c3, s0, s1, s2, s3, name_len, version] = header else {
            return Err(UpdateError::data_loss("metadata header malformed"));
        };
        if version != METADATA_VERSION {
            return Err(UpdateError::data_loss(format!(
                "unsupported metadata version {version}"
            )));
        }
        if name.len() != usize::from(name_len) {
            return Err(UpdateError::data_loss(format!(
                "metadata name length {name_len} does not match {} trailing bytes",
                name.len()
            )));
        }
        let file_name = if name.is_empty() {
            None
        } else {
            Some(
                String::from_utf8(name.to_vec())
                    .map_err(|e| UpdateError::data_loss(format!("metadata file name: {e}")))?,
            )
        };
        Ok(Self {
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
            data_size_bytes: u32::from_le_bytes([s0, s1, s2, s3]),
            file_name,
        })
    }
}
