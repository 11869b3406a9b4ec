//! The blob store engine.
//!
//! One blob lives in one flash partition. Writes are staged in a RAM buffer
//! and committed to flash in whole `flash_write_size_bytes` chunks; the final
//! partial chunk is padded when the writer closes. `write_address` is the
//! logical end of the data (committed plus buffered) and `flash_address` the
//! end of what is physically committed, so
//! `flash_address <= write_address <= max_data_size_bytes()` always holds.
//!
//! A metadata record (checksum, size, file name) is written to the key-value
//! store under the blob name only after a successful close. Its presence is
//! what makes a blob valid across restarts.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use updatekit_errors::{ErrorKind, Result, UpdateError};

use crate::checksum::ChecksumAlgorithm;
use crate::config::BlobStoreConfig;
use crate::flash::FlashPartition;
use crate::kvs::KeyValueStore;
use crate::metadata::{BlobMetadata, METADATA_HEADER_SIZE};

const READ_BACK_CHUNK: usize = 64;

/// Single-blob storage over a flash partition.
///
/// All operations take `&self`; handles ([`BlobWriter`](crate::BlobWriter),
/// [`DeferredBlobWriter`](crate::DeferredBlobWriter),
/// [`BlobReader`](crate::BlobReader)) share the store through an `Arc`.
/// At most one writer may be open, and never together with a reader.
pub struct BlobStore {
    config: BlobStoreConfig,
    max_data_size: usize,
    partition: Arc<Mutex<dyn FlashPartition>>,
    kvs: Arc<Mutex<dyn KeyValueStore>>,
    state: Mutex<StoreState>,
}

struct StoreState {
    initialized: bool,
    valid_data: bool,
    flash_erased: bool,
    writer_open: bool,
    readers_open: usize,
    write_error: bool,
    write_address: usize,
    flash_address: usize,
    file_name: Option<String>,
    write_buffer: Vec<u8>,
    checksum: Option<Box<dyn ChecksumAlgorithm>>,
}

impl BlobStore {
    /// Create a store. Call [`init`](Self::init) before use.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the flash write size is zero or not a multiple of
    /// the partition alignment, the write buffer is smaller than the flash
    /// write size, or the partition size is not a multiple of the flash write
    /// size.
    pub fn new(
        config: BlobStoreConfig,
        partition: Arc<Mutex<dyn FlashPartition>>,
        kvs: Arc<Mutex<dyn KeyValueStore>>,
    ) -> Result<Self> {
        let (size, alignment) = {
            let p = partition.lock();
            (p.size_bytes(), p.alignment_bytes())
        };
        let fws = config.flash_write_size_bytes;
        if fws == 0 {
            return Err(UpdateError::invalid_argument("flash write size must be non-zero"));
        }
        if alignment == 0 || !fws.is_multiple_of(alignment) {
            return Err(UpdateError::invalid_argument(format!(
                "flash write size {fws} is not a multiple of partition alignment {alignment}"
            )));
        }
        if config.write_buffer_size_bytes < fws {
            return Err(UpdateError::invalid_argument(format!(
                "write buffer of {} bytes is smaller than flash write size {fws}",
                config.write_buffer_size_bytes
            )));
        }
        if !size.is_multiple_of(fws) {
            return Err(UpdateError::invalid_argument(format!(
                "partition size {size} is not a multiple of flash write size {fws}"
            )));
        }

        let state = StoreState {
            initialized: false,
            valid_data: false,
            flash_erased: false,
            writer_open: false,
            readers_open: 0,
            write_error: false,
            write_address: 0,
            flash_address: 0,
            file_name: None,
            write_buffer: Vec::with_capacity(config.write_buffer_size_bytes),
            checksum: None,
        };
        Ok(Self {
            config,
            max_data_size: size,
            partition,
            kvs,
            state: Mutex::new(state),
        })
    }

    /// Attach a checksum algorithm covering the logical blob bytes.
    pub fn with_checksum(self, algorithm: Box<dyn ChecksumAlgorithm>) -> Self {
        self.state.lock().checksum = Some(algorithm);
        self
    }

    /// Load blob state from the key-value store and partition.
    ///
    /// Never modifies flash or metadata. A metadata record that cannot be
    /// parsed or whose checksum does not match leaves the blob invalid.
    /// Idempotent once it has succeeded.
    ///
    /// # Errors
    ///
    /// Key-value store or flash read failures; the store stays uninitialized
    /// and `init` may be retried.
    pub fn init(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.initialized {
            return Ok(());
        }
        st.valid_data = false;
        st.write_error = false;
        st.writer_open = false;
        st.readers_open = 0;
        st.write_address = 0;
        st.flash_address = 0;
        st.file_name = None;
        st.write_buffer.clear();

        let fetched = self.kvs.lock().get(&self.config.name);
        let record = match fetched {
            Ok(bytes) => match BlobMetadata::decode(&bytes) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!(blob = %self.config.name, error = %e, "ignoring unreadable blob metadata");
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        if let Some(meta) = record {
            let size = meta.data_size_bytes as usize;
            if size > self.max_data_size {
                warn!(
                    blob = %self.config.name,
                    size,
                    max = self.max_data_size,
                    "blob metadata size exceeds partition"
                );
            } else {
                match self.validate_checksum(&mut st, size, meta.checksum) {
                    Ok(()) => {
                        st.valid_data = true;
                        st.flash_address = size;
                        st.write_address = size;
                        st.file_name = meta.file_name;
                    }
                    Err(e) => {
                        warn!(blob = %self.config.name, error = %e, "stored blob failed validation");
                    }
                }
            }
        }

        st.flash_erased = if st.valid_data {
            false
        } else {
            self.partition.lock().is_erased()?
        };
        st.initialized = true;
        info!(
            blob = %self.config.name,
            valid = st.valid_data,
            size = st.flash_address,
            erased = st.flash_erased,
            "blob store initialized"
        );
        Ok(())
    }

    /// Blob name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Store configuration.
    pub fn config(&self) -> &BlobStoreConfig {
        &self.config
    }

    /// Whether [`init`](Self::init) has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Whether a valid, non-empty blob is stored.
    pub fn has_data(&self) -> bool {
        Self::has_data_locked(&self.state.lock())
    }

    /// Number of readable bytes in the stored blob.
    pub fn readable_data_bytes(&self) -> usize {
        Self::readable_locked(&self.state.lock())
    }

    /// Blob capacity.
    pub fn max_data_size_bytes(&self) -> usize {
        self.max_data_size
    }

    /// Longest file name the metadata buffer can hold.
    pub fn max_file_name_len(&self) -> usize {
        self.config
            .metadata_buffer_size_bytes
            .saturating_sub(METADATA_HEADER_SIZE)
            .min(usize::from(u8::MAX))
    }

    /// File name of the stored blob, or the pending name while a writer is
    /// open.
    ///
    /// # Errors
    ///
    /// `NotFound` when no name is set.
    pub fn file_name(&self) -> Result<String> {
        self.state
            .lock()
            .file_name
            .clone()
            .ok_or_else(|| UpdateError::not_found(format!("blob '{}' has no file name", self.config.name)))
    }

    /// Invalidate the blob and erase the partition.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` before init, `Unavailable` while any handle is
    /// open, `DataLoss` if the erase fails.
    pub fn erase(&self) -> Result<()> {
        let mut st = self.state.lock();
        self.check_idle(&st)?;
        self.invalidate_locked(&mut st)?;
        if !st.flash_erased {
            self.partition.lock().erase()?;
            st.flash_erased = true;
        }
        st.write_error = false;
        info!(blob = %self.config.name, "blob erased");
        Ok(())
    }

    /// Drop the metadata record so the blob is no longer valid. Flash
    /// contents are left in place.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` before init, `Unavailable` while any handle is
    /// open, key-value store failures.
    pub fn invalidate(&self) -> Result<()> {
        let mut st = self.state.lock();
        self.check_idle(&st)?;
        self.invalidate_locked(&mut st)?;
        info!(blob = %self.config.name, "blob invalidated");
        Ok(())
    }

    // Writer support

    pub(crate) fn open_write(&self) -> Result<()> {
        let mut st = self.state.lock();
        if !st.initialized {
            return Err(self.not_initialized());
        }
        if st.writer_open {
            return Err(UpdateError::unavailable(format!(
                "blob '{}' already has an open writer",
                self.config.name
            )));
        }
        if st.readers_open > 0 {
            return Err(UpdateError::unavailable(format!(
                "blob '{}' has {} open readers",
                self.config.name, st.readers_open
            )));
        }
        if let Err(e) = self.invalidate_locked(&mut st) {
            error!(blob = %self.config.name, error = %e, "failed to discard previous blob");
            return Err(e);
        }
        st.writer_open = true;
        st.write_error = false;
        debug!(blob = %self.config.name, "writer opened");
        Ok(())
    }

    pub(crate) fn close_write(&self) -> Result<()> {
        let mut st = self.state.lock();
        if !st.writer_open {
            return Err(UpdateError::failed_precondition("writer is not open"));
        }
        let outcome = self.finish_write(&mut st);
        st.writer_open = false;
        match outcome {
            Ok(()) => {
                info!(
                    blob = %self.config.name,
                    size = st.flash_address,
                    valid = st.valid_data,
                    "writer closed"
                );
                Ok(())
            }
            Err(e) => {
                st.valid_data = false;
                st.write_error = true;
                error!(blob = %self.config.name, error = %e, "blob close failed; blob is invalid");
                Err(UpdateError::data_loss(format!(
                    "closing blob '{}' failed: {}",
                    self.config.name,
                    e.message()
                )))
            }
        }
    }

    pub(crate) fn write(&self, data: &[u8]) -> Result<()> {
        let mut st = self.state.lock();
        self.check_writable(&st)?;
        if data.is_empty() {
            return Ok(());
        }
        self.check_capacity(&st, data.len())?;
        let outcome = self.write_locked(&mut st, data);
        self.record_write_outcome(&mut st, outcome)
    }

    pub(crate) fn add_to_write_buffer(&self, data: &[u8]) -> Result<()> {
        let mut st = self.state.lock();
        self.check_writable(&st)?;
        if data.is_empty() {
            return Ok(());
        }
        self.check_capacity(&st, data.len())?;
        let free = self.config.write_buffer_size_bytes - st.write_buffer.len();
        if free < data.len() {
            return Err(UpdateError::resource_exhausted(format!(
                "{} bytes do not fit in {free} free write buffer bytes",
                data.len()
            )));
        }
        st.write_buffer.extend_from_slice(data);
        st.write_address += data.len();
        Ok(())
    }

    pub(crate) fn flush(&self) -> Result<()> {
        let mut st = self.state.lock();
        self.check_writable(&st)?;
        let outcome = self.flush_locked(&mut st);
        self.record_write_outcome(&mut st, outcome)
    }

    pub(crate) fn write_bytes_remaining(&self) -> usize {
        let st = self.state.lock();
        if !st.writer_open {
            return 0;
        }
        self.max_data_size - st.write_address
    }

    pub(crate) fn write_buffer_bytes_free(&self) -> usize {
        let st = self.state.lock();
        self.config.write_buffer_size_bytes - st.write_buffer.len()
    }

    pub(crate) fn set_file_name(&self, name: &str) -> Result<()> {
        let mut st = self.state.lock();
        if !st.writer_open {
            return Err(UpdateError::failed_precondition("writer is not open"));
        }
        let max = self.max_file_name_len();
        if name.len() > max {
            return Err(UpdateError::resource_exhausted(format!(
                "file name of {} bytes exceeds {max} byte limit",
                name.len()
            )));
        }
        st.file_name = if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
        Ok(())
    }

    pub(crate) fn discard(&self) -> Result<()> {
        let mut st = self.state.lock();
        if !st.writer_open {
            return Err(UpdateError::failed_precondition("writer is not open"));
        }
        self.invalidate_locked(&mut st)?;
        debug!(blob = %self.config.name, "writer discarded blob contents");
        Ok(())
    }

    pub(crate) fn erase_for_writer(&self) -> Result<()> {
        let mut st = self.state.lock();
        if !st.writer_open {
            return Err(UpdateError::failed_precondition("writer is not open"));
        }
        self.invalidate_locked(&mut st)?;
        if let Err(e) = self.partition.lock().erase() {
            st.write_error = true;
            st.flash_erased = false;
            error!(blob = %self.config.name, error = %e, "blob erase failed");
            return Err(UpdateError::data_loss(format!("erase failed: {}", e.message())));
        }
        st.flash_erased = true;
        st.write_error = false;
        Ok(())
    }

    // Reader support

    pub(crate) fn open_read(&self, offset: usize) -> Result<()> {
        let mut st = self.state.lock();
        if !st.initialized {
            return Err(self.not_initialized());
        }
        if st.writer_open {
            return Err(UpdateError::unavailable(format!(
                "blob '{}' has an open writer",
                self.config.name
            )));
        }
        if !Self::has_data_locked(&st) {
            return Err(UpdateError::failed_precondition(format!(
                "blob '{}' has no valid data",
                self.config.name
            )));
        }
        if offset >= st.flash_address {
            return Err(UpdateError::invalid_argument(format!(
                "read offset {offset} is past blob end {}",
                st.flash_address
            )));
        }
        st.readers_open += 1;
        debug!(blob = %self.config.name, offset, readers = st.readers_open, "reader opened");
        Ok(())
    }

    pub(crate) fn close_read(&self) {
        let mut st = self.state.lock();
        st.readers_open = st.readers_open.saturating_sub(1);
        debug!(blob = %self.config.name, readers = st.readers_open, "reader closed");
    }

    pub(crate) fn read_at(&self, offset: usize, dest: &mut [u8]) -> Result<usize> {
        let st = self.state.lock();
        if !Self::has_data_locked(&st) {
            return Err(UpdateError::failed_precondition("blob has no valid data"));
        }
        let readable = st.flash_address;
        if offset >= readable {
            return Err(UpdateError::out_of_range("end of blob"));
        }
        let n = dest.len().min(readable - offset);
        self.partition.lock().read(offset, &mut dest[..n])?;
        Ok(n)
    }

    // Internals

    fn has_data_locked(st: &StoreState) -> bool {
        Self::readable_locked(st) > 0
    }

    fn readable_locked(st: &StoreState) -> usize {
        if st.valid_data { st.flash_address } else { 0 }
    }

    fn not_initialized(&self) -> UpdateError {
        UpdateError::failed_precondition(format!("blob store '{}' is not initialized", self.config.name))
    }

    fn check_idle(&self, st: &StoreState) -> Result<()> {
        if !st.initialized {
            return Err(self.not_initialized());
        }
        if st.writer_open || st.readers_open > 0 {
            return Err(UpdateError::unavailable(format!(
                "blob '{}' has open handles",
                self.config.name
            )));
        }
        Ok(())
    }

    fn check_writable(&self, st: &StoreState) -> Result<()> {
        if !st.writer_open {
            return Err(UpdateError::failed_precondition("writer is not open"));
        }
        if st.write_error {
            return Err(UpdateError::data_loss(format!(
                "blob '{}' had a previous write failure",
                self.config.name
            )));
        }
        Ok(())
    }

    fn check_capacity(&self, st: &StoreState, len: usize) -> Result<()> {
        let remaining = self.max_data_size - st.write_address;
        if remaining == 0 {
            return Err(UpdateError::out_of_range(format!(
                "blob '{}' is full",
                self.config.name
            )));
        }
        if remaining < len {
            return Err(UpdateError::resource_exhausted(format!(
                "{len} bytes do not fit in {remaining} remaining"
            )));
        }
        Ok(())
    }

    fn record_write_outcome(&self, st: &mut StoreState, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                st.write_error = true;
                error!(blob = %self.config.name, error = %e, "blob write failed");
                Err(UpdateError::data_loss(format!(
                    "write to blob '{}' failed: {}",
                    self.config.name,
                    e.message()
                )))
            }
        }
    }

    /// Reset in-memory state to an empty, invalid blob and delete the
    /// metadata record.
    fn invalidate_locked(&self, st: &mut StoreState) -> Result<()> {
        st.valid_data = false;
        st.write_address = 0;
        st.flash_address = 0;
        st.file_name = None;
        st.write_buffer.clear();
        if let Some(algo) = st.checksum.as_mut() {
            algo.reset();
        }
        match self.kvs.lock().delete(&self.config.name) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn write_locked(&self, st: &mut StoreState, mut data: &[u8]) -> Result<()> {
        let fws = self.config.flash_write_size_bytes;
        if st.write_buffer.len() >= fws {
            self.flush_locked(st)?;
        }

        // Top up a partially filled chunk first.
        if !st.write_buffer.is_empty() {
            let add = (fws - st.write_buffer.len()).min(data.len());
            let (head, rest) = data.split_at(add);
            st.write_buffer.extend_from_slice(head);
            st.write_address += add;
            data = rest;
            if st.write_buffer.len() < fws {
                return Ok(());
            }
            self.flush_locked(st)?;
        }

        // Whole chunks go straight to flash.
        while data.len() >= fws {
            let (chunk, rest) = data.split_at(fws);
            self.commit(st, chunk, fws)?;
            st.write_address += fws;
            data = rest;
        }

        if !data.is_empty() {
            st.write_buffer.extend_from_slice(data);
            st.write_address += data.len();
        }
        Ok(())
    }

    /// Commit every whole chunk in the write buffer, keeping the remainder.
    fn flush_locked(&self, st: &mut StoreState) -> Result<()> {
        let fws = self.config.flash_write_size_bytes;
        let whole = st.write_buffer.len() - st.write_buffer.len() % fws;
        if whole == 0 {
            return Ok(());
        }
        let mut buffered = std::mem::take(&mut st.write_buffer);
        let outcome = buffered
            .get(..whole)
            .unwrap_or_default()
            .chunks_exact(fws)
            .try_for_each(|chunk| self.commit(st, chunk, fws));
        buffered.drain(..whole);
        st.write_buffer = buffered;
        outcome
    }

    /// Pad the buffered tail to a whole chunk and commit it. Only the
    /// logical bytes advance `flash_address`.
    fn flush_final_partial_chunk(&self, st: &mut StoreState) -> Result<()> {
        let fws = self.config.flash_write_size_bytes;
        let bytes_in_buffer = st.write_buffer.len();
        if bytes_in_buffer == 0 || bytes_in_buffer >= fws {
            return Err(UpdateError::internal(format!(
                "final chunk of {bytes_in_buffer} bytes with flash write size {fws}"
            )));
        }
        let erased = self.partition.lock().erased_value();
        let mut chunk = std::mem::take(&mut st.write_buffer);
        chunk.resize(fws, erased);
        let outcome = self.commit(st, &chunk, bytes_in_buffer);
        chunk.clear();
        st.write_buffer = chunk;
        outcome
    }

    fn commit(&self, st: &mut StoreState, chunk: &[u8], logical_len: usize) -> Result<()> {
        let mut partition = self.partition.lock();
        if st.flash_address == 0 && !st.flash_erased {
            debug!(blob = %self.config.name, "erasing partition before first write");
            partition.erase()?;
            st.flash_erased = true;
        }
        st.flash_erased = false;
        partition.write(st.flash_address, chunk)?;
        if let Some(algo) = st.checksum.as_mut() {
            algo.update(chunk.get(..logical_len).unwrap_or_default());
        }
        st.flash_address += logical_len;
        Ok(())
    }

    fn finish_write(&self, st: &mut StoreState) -> Result<()> {
        if st.write_error {
            return Err(UpdateError::data_loss("previous write failure"));
        }
        self.flush_locked(st)?;
        if st.write_address == 0 {
            debug!(blob = %self.config.name, "writer closed without data");
            return Ok(());
        }
        if !st.write_buffer.is_empty() {
            self.flush_final_partial_chunk(st)?;
        }
        if st.flash_address != st.write_address {
            return Err(UpdateError::internal(format!(
                "flash address {} does not match write address {}",
                st.flash_address, st.write_address
            )));
        }

        let checksum = st.checksum.as_ref().map_or(0, |algo| algo.finish());
        let size = st.flash_address;
        self.validate_checksum(st, size, checksum)?;

        let meta = BlobMetadata {
            checksum,
            data_size_bytes: u32::try_from(size)
                .map_err(|e| UpdateError::out_of_range(format!("blob size {size}: {e}")))?,
            file_name: st.file_name.clone(),
        };
        self.kvs.lock().put(&self.config.name, &meta.encode()?)?;
        st.valid_data = true;
        Ok(())
    }

    /// Recompute the checksum over `size` committed bytes read back from
    /// flash. A no-op without a checksum algorithm.
    fn validate_checksum(&self, st: &mut StoreState, size: usize, expected: u32) -> Result<()> {
        let Some(algo) = st.checksum.as_mut() else {
            return Ok(());
        };
        algo.reset();
        let mut partition = self.partition.lock();
        let mut buf = [0u8; READ_BACK_CHUNK];
        let mut address = 0;
        while address < size {
            let len = READ_BACK_CHUNK.min(size - address);
            let dest = &mut buf[..len];
            partition.read(address, dest)?;
            algo.update(dest);
            address += len;
        }
        let actual = algo.finish();
        if actual != expected {
            return Err(UpdateError::data_loss(format!(
                "checksum mismatch: stored {expected:#010x}, computed {actual:#010x}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("BlobStore")
            .field("name", &self.config.name)
            .field("initialized", &st.initialized)
            .field("valid_data", &st.valid_data)
            .field("writer_open", &st.writer_open)
            .field("readers_open", &st.readers_open)
            .field("write_address", &st.write_address)
            .field("flash_address", &st.flash_address)
            .finish()
    }
}
