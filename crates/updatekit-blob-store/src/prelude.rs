//! Convenience re-exports

pub use crate::checksum::{ChecksumAlgorithm, Crc32Checksum};
pub use crate::config::BlobStoreConfig;
pub use crate::flash::{FlashPartition, InMemoryFlashPartition};
pub use crate::kvs::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
pub use crate::reader::BlobReader;
pub use crate::store::BlobStore;
pub use crate::writer::{BlobWriter, DeferredBlobWriter};
