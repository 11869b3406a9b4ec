//! Flash-backed single-blob storage
//!
//! A [`BlobStore`] keeps one named byte stream in a dedicated flash
//! partition. It is used to stage update bundles: a transfer writes the
//! bundle through a [`BlobWriter`], and the verifier later reads it back
//! through one or more [`BlobReader`]s.
//!
//! # Architecture
//!
//! - [`store`]: the [`BlobStore`] engine (buffering, addressing, checksum,
//!   metadata persistence, handle mutual exclusion)
//! - [`writer`]: [`BlobWriter`] and [`DeferredBlobWriter`]
//! - [`reader`]: [`BlobReader`]
//! - [`flash`]: [`FlashPartition`] and [`InMemoryFlashPartition`]
//! - [`kvs`]: [`KeyValueStore`], [`InMemoryKeyValueStore`],
//!   [`FileKeyValueStore`]
//! - [`checksum`]: [`ChecksumAlgorithm`] and [`Crc32Checksum`]
//! - [`metadata`]: the on-KVS metadata record
//!
//! # Error semantics
//!
//! | Kind | Meaning |
//! |---|---|
//! | `ResourceExhausted` | no room right now; retry later |
//! | `OutOfRange` | blob full (write) or end of data (read) |
//! | `DataLoss` | flash failure; sticky until erase or a new open |
//! | `Unavailable` | another handle holds the blob |
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use updatekit_blob_store::prelude::*;
//! use updatekit_stream::{Reader, Writer};
//!
//! # fn main() -> updatekit_errors::Result<()> {
//! let partition = Arc::new(Mutex::new(InMemoryFlashPartition::new(1024, 16)?));
//! let kvs = Arc::new(Mutex::new(InMemoryKeyValueStore::new()));
//! let store = Arc::new(
//!     BlobStore::new(BlobStoreConfig::named("bundle"), partition, kvs)?
//!         .with_checksum(Box::new(Crc32Checksum::new())),
//! );
//! store.init()?;
//!
//! let mut writer = BlobWriter::new(Arc::clone(&store));
//! writer.open()?;
//! writer.set_file_name("update.bin")?;
//! writer.write(b"hello flash")?;
//! writer.close()?;
//!
//! let mut reader = BlobReader::new(store);
//! reader.open()?;
//! let mut buf = [0u8; 32];
//! let n = reader.read(&mut buf)?;
//! assert_eq!(&buf[..n], b"hello flash");
//! assert_eq!(reader.file_name()?, "update.bin");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod checksum;
pub mod config;
pub mod flash;
pub mod kvs;
pub mod metadata;
pub mod prelude;
pub mod reader;
pub mod store;
pub mod writer;

pub use checksum::{ChecksumAlgorithm, Crc32Checksum};
pub use config::BlobStoreConfig;
pub use flash::{FlashPartition, InMemoryFlashPartition};
pub use kvs::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
pub use metadata::{BlobMetadata, METADATA_HEADER_SIZE};
pub use reader::BlobReader;
pub use store::BlobStore;
pub use writer::{BlobWriter, DeferredBlobWriter};
