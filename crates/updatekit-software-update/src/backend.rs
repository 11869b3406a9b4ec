//! Product-specific hooks used by the bundle accessor and update service

use updatekit_errors::{Result, UpdateError};
use updatekit_stream::{Reader, Writer};

use crate::manifest::ManifestAccessor;

/// Device integration points for applying a verified bundle.
///
/// Only [`apply_target_file`](Self::apply_target_file) is mandatory. The
/// lifecycle hooks default to success; the storage hooks default to
/// `Unimplemented`, which the accessor reports as "no trusted root" or "no
/// on-device manifest".
pub trait BundledUpdateBackend: Send {
    /// Called by `Start` before the transfer is enabled.
    fn before_update_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called whenever an update is aborted or fails.
    fn before_update_abort(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called before a bundle is opened for verification.
    fn before_bundle_verify(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after a bundle passed verification.
    fn after_bundle_verified(&mut self) -> Result<()> {
        Ok(())
    }

    /// Extra product check for a personalized-out target, run after its
    /// length and hash matched the on-device manifest.
    fn verify_target_file(
        &mut self,
        _device_manifest: &ManifestAccessor,
        _target_file_name: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// Enable the channel the bundle is transferred over and return its id.
    ///
    /// # Errors
    ///
    /// `Unimplemented` unless overridden.
    fn enable_bundle_transfer_handler(&mut self, _bundle_filename: Option<&str>) -> Result<u32> {
        Err(UpdateError::unimplemented("enable_bundle_transfer_handler"))
    }

    /// Disable the transfer channel. Must be idempotent.
    fn disable_bundle_transfer_handler(&mut self) {}

    /// Called before the first target file is applied.
    fn before_apply(&mut self) -> Result<()> {
        Ok(())
    }

    /// Install one target file. `update_bundle_offset` is the absolute
    /// offset of the payload within the staged bundle.
    ///
    /// # Errors
    ///
    /// Any failure aborts the apply.
    fn apply_target_file(
        &mut self,
        target_file_name: &str,
        payload: &mut dyn Reader,
        update_bundle_offset: usize,
    ) -> Result<()>;

    /// Reboot into the new software. On a device this does not return on
    /// success; host backends return `Ok`.
    ///
    /// # Errors
    ///
    /// `Unimplemented` unless overridden.
    fn apply_reboot(&mut self) -> Result<()> {
        Err(UpdateError::unimplemented("apply_reboot"))
    }

    /// Called before the on-device manifest is read.
    fn before_manifest_read(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reader over the serialized on-device manifest.
    ///
    /// # Errors
    ///
    /// `Unimplemented` unless overridden; `NotFound` when none is stored.
    fn get_manifest_reader(&mut self) -> Result<Box<dyn Reader + '_>> {
        Err(UpdateError::unimplemented("get_manifest_reader"))
    }

    /// Called before the on-device manifest is replaced.
    fn before_manifest_write(&mut self) -> Result<()> {
        Ok(())
    }

    /// Writer that replaces the on-device manifest.
    ///
    /// # Errors
    ///
    /// `Unimplemented` unless overridden.
    fn get_manifest_writer(&mut self) -> Result<Box<dyn Writer + '_>> {
        Err(UpdateError::unimplemented("get_manifest_writer"))
    }

    /// Called after the manifest writer has been dropped.
    fn after_manifest_write(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reader over the serialized on-device `SignedRootMetadata`.
    ///
    /// # Errors
    ///
    /// `Unimplemented` unless overridden; `NotFound` when none is
    /// provisioned.
    fn get_root_metadata_reader(&mut self) -> Result<Box<dyn Reader + '_>> {
        Err(UpdateError::unimplemented("get_root_metadata_reader"))
    }

    /// Durably replace the on-device root with the serialized
    /// `SignedRootMetadata` read from `root_metadata`.
    ///
    /// # Errors
    ///
    /// `Unimplemented` unless overridden.
    fn safely_persist_root_metadata(&mut self, _root_metadata: &mut dyn Reader) -> Result<()> {
        Err(UpdateError::unimplemented("safely_persist_root_metadata"))
    }
}
