//! In-memory [`BundledUpdateBackend`] for host tools and tests

use std::collections::BTreeSet;

use tracing::{debug, info};
use updatekit_errors::{Result, UpdateError};
use updatekit_stream::{MemoryReader, Reader, Writer};

use crate::backend::BundledUpdateBackend;
use crate::manifest::ManifestAccessor;

/// Hooks of [`InMemoryBackend`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendHook {
    /// `before_update_start`
    BeforeUpdateStart,
    /// `before_bundle_verify`
    BeforeBundleVerify,
    /// `after_bundle_verified`
    AfterBundleVerified,
    /// `verify_target_file`
    VerifyTargetFile,
    /// `enable_bundle_transfer_handler`
    EnableTransfer,
    /// `before_apply`
    BeforeApply,
    /// `apply_target_file`
    ApplyTargetFile,
    /// `apply_reboot`
    ApplyReboot,
    /// `get_manifest_writer`
    ManifestWrite,
    /// `safely_persist_root_metadata`
    PersistRoot,
}

/// A target file handed to [`BundledUpdateBackend::apply_target_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTarget {
    /// Target name
    pub name: String,
    /// Payload bytes
    pub data: Vec<u8>,
    /// Offset of the payload within the bundle
    pub bundle_offset: usize,
}

/// Backend that keeps the trusted root, manifest and applied targets in
/// memory and records every hook call.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    trusted_root: Option<Vec<u8>>,
    manifest: Option<Vec<u8>>,
    applied: Vec<AppliedTarget>,
    events: Vec<&'static str>,
    failing: BTreeSet<BackendHook>,
    next_transfer_id: u32,
    transfer_enabled: bool,
    root_persist_count: usize,
    reboot_count: usize,
}

impl InMemoryBackend {
    /// Backend with no provisioned root or manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend provisioned with serialized `SignedRootMetadata`.
    pub fn with_trusted_root(root: impl Into<Vec<u8>>) -> Self {
        Self {
            trusted_root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Replace the provisioned root.
    pub fn set_trusted_root(&mut self, root: Option<Vec<u8>>) {
        self.trusted_root = root;
    }

    /// Replace the stored manifest.
    pub fn set_manifest(&mut self, manifest: Option<Vec<u8>>) {
        self.manifest = manifest;
    }

    /// Make `hook` fail (or succeed again).
    pub fn set_failing(&mut self, hook: BackendHook, failing: bool) {
        if failing {
            self.failing.insert(hook);
        } else {
            self.failing.remove(&hook);
        }
    }

    /// Currently stored root.
    pub fn trusted_root(&self) -> Option<&[u8]> {
        self.trusted_root.as_deref()
    }

    /// Currently stored manifest.
    pub fn manifest(&self) -> Option<&[u8]> {
        self.manifest.as_deref()
    }

    /// Decoded stored manifest.
    pub fn manifest_accessor(&self) -> Option<ManifestAccessor> {
        self.manifest
            .as_deref()
            .and_then(|bytes| ManifestAccessor::decode(bytes).ok())
    }

    /// Targets applied so far, in order.
    pub fn applied(&self) -> &[AppliedTarget] {
        &self.applied
    }

    /// Hook calls so far, in order.
    pub fn events(&self) -> &[&'static str] {
        &self.events
    }

    /// Whether the transfer channel is enabled.
    pub fn transfer_enabled(&self) -> bool {
        self.transfer_enabled
    }

    /// Number of successful root upgrades.
    pub fn root_persist_count(&self) -> usize {
        self.root_persist_count
    }

    /// Number of `apply_reboot` calls.
    pub fn reboot_count(&self) -> usize {
        self.reboot_count
    }

    fn hook(&mut self, hook: BackendHook, event: &'static str) -> Result<()> {
        self.events.push(event);
        if self.failing.contains(&hook) {
            debug!(event, "Injected backend failure");
            return Err(UpdateError::internal(format!("injected failure in {event}")));
        }
        Ok(())
    }
}

/// Writer that stores into the backend's manifest slot when dropped.
struct ManifestSlotWriter<'a> {
    slot: &'a mut Option<Vec<u8>>,
    buffer: Vec<u8>,
}

impl Writer for ManifestSlotWriter<'_> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }
}

impl Drop for ManifestSlotWriter<'_> {
    fn drop(&mut self) {
        *self.slot = Some(std::mem::take(&mut self.buffer));
    }
}

impl BundledUpdateBackend for InMemoryBackend {
    fn before_update_start(&mut self) -> Result<()> {
        self.hook(BackendHook::BeforeUpdateStart, "before_update_start")
    }

    fn before_update_abort(&mut self) -> Result<()> {
        self.events.push("before_update_abort");
        Ok(())
    }

    fn before_bundle_verify(&mut self) -> Result<()> {
        self.hook(BackendHook::BeforeBundleVerify, "before_bundle_verify")
    }

    fn after_bundle_verified(&mut self) -> Result<()> {
        self.hook(BackendHook::AfterBundleVerified, "after_bundle_verified")
    }

    fn verify_target_file(
        &mut self,
        _device_manifest: &ManifestAccessor,
        _target_file_name: &str,
    ) -> Result<()> {
        self.hook(BackendHook::VerifyTargetFile, "verify_target_file")
    }

    fn enable_bundle_transfer_handler(&mut self, _bundle_filename: Option<&str>) -> Result<u32> {
        self.hook(BackendHook::EnableTransfer, "enable_bundle_transfer_handler")?;
        self.next_transfer_id = self.next_transfer_id.wrapping_add(1);
        self.transfer_enabled = true;
        Ok(self.next_transfer_id)
    }

    fn disable_bundle_transfer_handler(&mut self) {
        self.events.push("disable_bundle_transfer_handler");
        self.transfer_enabled = false;
    }

    fn before_apply(&mut self) -> Result<()> {
        self.hook(BackendHook::BeforeApply, "before_apply")
    }

    fn apply_target_file(
        &mut self,
        target_file_name: &str,
        payload: &mut dyn Reader,
        update_bundle_offset: usize,
    ) -> Result<()> {
        self.hook(BackendHook::ApplyTargetFile, "apply_target_file")?;
        let mut data = Vec::new();
        payload.read_to_end(&mut data)?;
        info!(target = target_file_name, bytes = data.len(), "Applied target file");
        self.applied.push(AppliedTarget {
            name: target_file_name.to_string(),
            data,
            bundle_offset: update_bundle_offset,
        });
        Ok(())
    }

    fn apply_reboot(&mut self) -> Result<()> {
        self.reboot_count += 1;
        self.hook(BackendHook::ApplyReboot, "apply_reboot")
    }

    fn before_manifest_read(&mut self) -> Result<()> {
        self.events.push("before_manifest_read");
        Ok(())
    }

    fn get_manifest_reader(&mut self) -> Result<Box<dyn Reader + '_>> {
        let manifest = self
            .manifest
            .clone()
            .ok_or_else(|| UpdateError::not_found("no manifest stored"))?;
        Ok(Box::new(MemoryReader::new(manifest)))
    }

    fn before_manifest_write(&mut self) -> Result<()> {
        self.events.push("before_manifest_write");
        Ok(())
    }

    fn get_manifest_writer(&mut self) -> Result<Box<dyn Writer + '_>> {
        self.hook(BackendHook::ManifestWrite, "get_manifest_writer")?;
        Ok(Box::new(ManifestSlotWriter {
            slot: &mut self.manifest,
            buffer: Vec::new(),
        }))
    }

    fn after_manifest_write(&mut self) -> Result<()> {
        self.events.push("after_manifest_write");
        Ok(())
    }

    fn get_root_metadata_reader(&mut self) -> Result<Box<dyn Reader + '_>> {
        let root = self
            .trusted_root
            .clone()
            .ok_or_else(|| UpdateError::not_found("no trusted root provisioned"))?;
        Ok(Box::new(MemoryReader::new(root)))
    }

    fn safely_persist_root_metadata(&mut self, root_metadata: &mut dyn Reader) -> Result<()> {
        self.hook(BackendHook::PersistRoot, "safely_persist_root_metadata")?;
        let mut bytes = Vec::new();
        root_metadata.read_to_end(&mut bytes)?;
        self.trusted_root = Some(bytes);
        self.root_persist_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updatekit_errors::ErrorKind;

    #[test]
    fn test_manifest_writer_stores_on_drop() -> Result<()> {
        let mut backend = InMemoryBackend::new();
        {
            let mut writer = backend.get_manifest_writer()?;
            writer.write(b"abc")?;
            writer.write(b"def")?;
        }
        assert_eq!(backend.manifest(), Some(&b"abcdef"[..]));
        Ok(())
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(
            backend.get_root_metadata_reader().err().map(|e| e.kind()),
            Some(ErrorKind::NotFound)
        );
    }

    #[test]
    fn test_injected_failure_and_recovery() -> Result<()> {
        let mut backend = InMemoryBackend::new();
        backend.set_failing(BackendHook::BeforeApply, true);
        assert!(backend.before_apply().is_err());
        backend.set_failing(BackendHook::BeforeApply, false);
        backend.before_apply()?;
        assert_eq!(backend.events(), ["before_apply", "before_apply"]);
        Ok(())
    }

    #[test]
    fn test_transfer_ids_increase() -> Result<()> {
        let mut backend = InMemoryBackend::new();
        let first = backend.enable_bundle_transfer_handler(None)?;
        let second = backend.enable_bundle_transfer_handler(Some("b.bin"))?;
        assert!(second > first);
        backend.disable_bundle_transfer_handler();
        assert!(!backend.transfer_enabled());
        Ok(())
    }
}
