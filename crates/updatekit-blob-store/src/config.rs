//! Blob store configuration.

use serde::{Deserialize, Serialize};

/// Sizing and naming parameters for a [`BlobStore`](crate::BlobStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobStoreConfig {
    /// Blob name; also the key of the metadata record in the key-value store.
    pub name: String,
    /// Size of the RAM write buffer. Must be at least `flash_write_size_bytes`.
    pub write_buffer_size_bytes: usize,
    /// Size of each flash program operation. Must be a non-zero multiple of
    /// the partition alignment.
    pub flash_write_size_bytes: usize,
    /// Size of the buffer used to hold the metadata record. Bounds the file
    /// name length.
    pub metadata_buffer_size_bytes: usize,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            name: "update_bundle".to_string(),
            write_buffer_size_bytes: 256,
            flash_write_size_bytes: 16,
            metadata_buffer_size_bytes: 64,
        }
    }
}

impl BlobStoreConfig {
    /// Config with the given name and default sizes.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
