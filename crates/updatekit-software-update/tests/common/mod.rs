//! Shared bundle fixtures

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Arc;

use parking_lot::Mutex;
use prost::Message;
use updatekit_blob_store::prelude::*;
use updatekit_crypto::SigningKeyPair;
use updatekit_errors::Result;
use updatekit_software_update::prelude::*;
use updatekit_software_update::proto::SignedRootMetadata;
use updatekit_stream::Writer;

pub const FILE1: &[u8] = b"file 1 content";
pub const FILE2: &[u8] = b"file 2 content";

/// Deterministic P-256 key; `seed` must be non-zero.
pub fn dev_key(seed: u8) -> Result<SigningKeyPair> {
    Ok(SigningKeyPair::from_bytes(&[seed; 32])?)
}

/// Root at `version` that trusts `root_key` for roots and `targets_key` for
/// targets, signed by `signers`.
pub fn signed_root(
    version: u32,
    root_key: &SigningKeyPair,
    targets_key: &SigningKeyPair,
    signers: &[SigningKeyPair],
) -> Result<SignedRootMetadata> {
    RootMetadataBuilder::new(version)
        .root_key(root_key.public_key_sec1())
        .targets_key(targets_key.public_key_sec1())
        .sign(signers)
}

/// Self-signed dev root at version 1 using one key for both roles.
pub fn dev_root(key: &SigningKeyPair) -> Result<SignedRootMetadata> {
    signed_root(1, key, key, std::slice::from_ref(key))
}

pub fn backend_with_root(root: &SignedRootMetadata) -> Arc<Mutex<InMemoryBackend>> {
    Arc::new(Mutex::new(InMemoryBackend::with_trusted_root(root.encode_to_vec())))
}

pub fn memory_accessor(
    bundle: Vec<u8>,
    backend: &Arc<Mutex<InMemoryBackend>>,
    config: BundleAccessorConfig,
) -> UpdateBundleAccessor {
    let backend: Arc<Mutex<dyn BundledUpdateBackend>> = backend.clone();
    UpdateBundleAccessor::new(Box::new(MemoryOpenableReader::new(bundle)), backend, config)
}

/// Bundle with `file1` and `file2` at `version`, signed by `key`.
pub fn two_file_bundle(version: u32, key: &SigningKeyPair) -> UpdateBundleBuilder {
    UpdateBundleBuilder::new(version)
        .target("file1", FILE1.to_vec())
        .target("file2", FILE2.to_vec())
        .sign_with(key.clone())
}

/// A blob store on a 4 KiB in-memory partition.
pub fn staging_store() -> Result<Arc<BlobStore>> {
    let partition = Arc::new(Mutex::new(InMemoryFlashPartition::new(4096, 16)?));
    let kvs = Arc::new(Mutex::new(InMemoryKeyValueStore::new()));
    let config = BlobStoreConfig {
        name: "update_bundle".to_string(),
        write_buffer_size_bytes: 64,
        flash_write_size_bytes: 16,
        metadata_buffer_size_bytes: 64,
    };
    let store = BlobStore::new(config, partition, kvs)?.with_checksum(Box::new(Crc32Checksum::new()));
    store.init()?;
    Ok(Arc::new(store))
}

/// Write `bundle` into `store` as a transfer would.
pub fn stage(store: &Arc<BlobStore>, bundle: &[u8]) -> Result<()> {
    let mut writer = BlobWriter::new(Arc::clone(store));
    writer.open()?;
    writer.set_file_name("bundle.bin")?;
    for chunk in bundle.chunks(100) {
        writer.write(chunk)?;
    }
    writer.close()
}
