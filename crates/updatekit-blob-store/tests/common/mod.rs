//! Shared blob store fixtures

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Arc;

use parking_lot::Mutex;
use updatekit_blob_store::prelude::*;
use updatekit_errors::Result;

pub const PARTITION_SIZE: usize = 256;
pub const FLASH_WRITE_SIZE: usize = 16;
pub const WRITE_BUFFER_SIZE: usize = 64;

pub struct Fixture {
    pub partition: Arc<Mutex<InMemoryFlashPartition>>,
    pub kvs: Arc<Mutex<InMemoryKeyValueStore>>,
    pub store: Arc<BlobStore>,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let partition = Arc::new(Mutex::new(InMemoryFlashPartition::new(PARTITION_SIZE, 8)?));
        let kvs = Arc::new(Mutex::new(InMemoryKeyValueStore::new()));
        let store = Self::open_store(&partition, &kvs)?;
        Ok(Self {
            partition,
            kvs,
            store,
        })
    }

    /// A second store instance over the same flash and metadata, as after a
    /// reboot.
    pub fn reopen(&self) -> Result<Arc<BlobStore>> {
        Self::open_store(&self.partition, &self.kvs)
    }

    fn open_store(
        partition: &Arc<Mutex<InMemoryFlashPartition>>,
        kvs: &Arc<Mutex<InMemoryKeyValueStore>>,
    ) -> Result<Arc<BlobStore>> {
        let config = BlobStoreConfig {
            name: "staging".to_string(),
            write_buffer_size_bytes: WRITE_BUFFER_SIZE,
            flash_write_size_bytes: FLASH_WRITE_SIZE,
            metadata_buffer_size_bytes: 32,
        };
        let store = BlobStore::new(config, Arc::<Mutex<InMemoryFlashPartition>>::clone(partition), Arc::<Mutex<InMemoryKeyValueStore>>::clone(kvs))?
            .with_checksum(Box::new(Crc32Checksum::new()));
        store.init()?;
        Ok(Arc::new(store))
    }

    pub fn write_blob(&self, data: &[u8], name: Option<&str>) -> Result<()> {
        use updatekit_stream::Writer;
        let mut writer = BlobWriter::new(Arc::clone(&self.store));
        writer.open()?;
        if let Some(name) = name {
            writer.set_file_name(name)?;
        }
        writer.write(data)?;
        writer.close()
    }

    pub fn read_blob(&self) -> Result<Vec<u8>> {
        use updatekit_stream::Reader;
        let mut reader = BlobReader::new(Arc::clone(&self.store));
        reader.open()?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        reader.close()?;
        Ok(out)
    }
}
