//! Verified access to a staged update bundle
//!
//! [`UpdateBundleAccessor`] is the only path from untrusted staged bytes to
//! anything the device acts on. Nothing inside the bundle is exposed until
//! [`open_and_verify`](UpdateBundleAccessor::open_and_verify) has completed
//! the whole chain:
//!
//! 1. open the backing reader and scan the bundle framing;
//! 2. load the trusted root (from the device, or from the bundle itself in
//!    self-verification mode);
//! 3. upgrade the root if the bundle carries a newer, validly signed one,
//!    persisting it immediately;
//! 4. check the top-level targets metadata signatures and anti-rollback;
//! 5. check every target payload's length and SHA-256, in the bundle or,
//!    for personalized-out targets, against the on-device manifest.
//!
//! Root persistence in step 3 happens before steps 4 and 5 so that a key
//! rotation takes effect even if the rest of the bundle is rejected.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use prost::Message;
use tracing::{debug, error, info, warn};
use updatekit_crypto::{Sha256Hasher, ct_eq, sha256, verify_ecdsa_p256_signature};
use updatekit_errors::{ErrorKind, Result, UpdateError};
use updatekit_stream::{IntervalReader, Reader, SeekableReader};

use crate::backend::BundledUpdateBackend;
use crate::config::BundleAccessorConfig;
use crate::manifest::ManifestAccessor;
use crate::openable::OpenableReader;
use crate::proto::{
    KeyMapping, KeyScheme, KeyType, RootMetadata, Signature, SignatureRequirement,
    SignedRootMetadata, SignedTargetsMetadata, TOP_LEVEL_TARGETS_NAME, TargetFile,
    USER_MANIFEST_TARGET_NAME,
};
use crate::wire::{BundleLayout, read_range, scan_bundle};

/// Bounded reader over one target payload inside the bundle.
pub type PayloadReader = IntervalReader<dyn SeekableReader>;

const HASH_CHUNK: usize = 256;

/// Where a verified target's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadSource {
    Bundle,
    Device,
}

/// Parses and verifies a staged bundle, then exposes its contents.
pub struct UpdateBundleAccessor {
    reader: Box<dyn OpenableReader>,
    backend: Arc<Mutex<dyn BundledUpdateBackend>>,
    config: BundleAccessorConfig,
    source: Option<Arc<Mutex<dyn SeekableReader>>>,
    layout: Option<BundleLayout>,
    trusted_root: Option<RootMetadata>,
    verified_targets: Option<Vec<u8>>,
    personalized_out: BTreeSet<String>,
    bundle_verified: bool,
}

impl std::fmt::Debug for UpdateBundleAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateBundleAccessor")
            .field("config", &self.config)
            .field("open", &self.layout.is_some())
            .field("verified", &self.bundle_verified)
            .field("trusted_root_version", &self.trusted_root_version())
            .finish_non_exhaustive()
    }
}

impl UpdateBundleAccessor {
    /// Create a closed accessor.
    pub fn new(
        reader: Box<dyn OpenableReader>,
        backend: Arc<Mutex<dyn BundledUpdateBackend>>,
        config: BundleAccessorConfig,
    ) -> Self {
        Self {
            reader,
            backend,
            config,
            source: None,
            layout: None,
            trusted_root: None,
            verified_targets: None,
            personalized_out: BTreeSet::new(),
            bundle_verified: false,
        }
    }

    /// Verification policy.
    pub fn config(&self) -> &BundleAccessorConfig {
        &self.config
    }

    /// Whether the bundle is open.
    pub fn is_open(&self) -> bool {
        self.layout.is_some()
    }

    /// Whether the bundle passed verification and has not been closed.
    pub fn is_verified(&self) -> bool {
        self.bundle_verified
    }

    /// The root the last verification trusted, after any upgrade.
    pub fn trusted_root(&self) -> Option<&RootMetadata> {
        self.trusted_root.as_ref()
    }

    /// Version of [`trusted_root`](Self::trusted_root).
    pub fn trusted_root_version(&self) -> Option<u32> {
        self.trusted_root.as_ref().map(RootMetadata::version)
    }

    /// Open the bundle and run the full verification chain.
    ///
    /// On failure the bundle is closed again and no content is exposed.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the bundle source is held elsewhere, `DataLoss` for
    /// malformed framing, `Unauthenticated` for any trust failure,
    /// `OutOfRange` for an oversized payload.
    pub fn open_and_verify(&mut self) -> Result<()> {
        if let Err(e) = self.do_open() {
            error!(error = %e, "Failed to open update bundle");
            self.close_quietly();
            return Err(e);
        }
        if let Err(e) = self.do_verify() {
            error!(error = %e, "Update bundle verification failed");
            self.close_quietly();
            return Err(e);
        }
        Ok(())
    }

    /// Close the bundle. Every accessor fails with `FailedPrecondition`
    /// until the next successful [`open_and_verify`](Self::open_and_verify).
    ///
    /// # Errors
    ///
    /// Errors closing the backing reader.
    pub fn close(&mut self) -> Result<()> {
        self.bundle_verified = false;
        self.verified_targets = None;
        self.personalized_out.clear();
        self.layout = None;
        self.source = None;
        if self.reader.is_open() {
            self.reader.close()?;
        }
        Ok(())
    }

    fn close_quietly(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close update bundle");
        }
    }

    fn do_open(&mut self) -> Result<()> {
        if self.is_open() {
            self.close()?;
        }
        self.reader.open()?;
        let source = self.reader.source();
        let layout = scan_bundle(&mut *source.lock())?;
        self.source = Some(source);
        self.layout = Some(layout);
        Ok(())
    }

    fn do_verify(&mut self) -> Result<()> {
        self.bundle_verified = false;
        self.personalized_out.clear();

        if self.config.disable_verification {
            warn!("Bundle verification is disabled; accepting bundle unchecked");
            self.verified_targets = self.read_signed_targets().ok().map(|t| t.serialized_targets_metadata);
            self.bundle_verified = true;
            return Ok(());
        }

        self.trusted_root = if self.config.self_verification {
            info!("Self-verifying bundle against its own root metadata");
            self.bundle_root()?
                .map(|signed| decode_root(&signed.serialized_root_metadata))
                .transpose()?
        } else {
            Some(self.on_device_trusted_root()?)
        };

        self.upgrade_root()?;

        let device_manifest = self.on_device_manifest();
        let targets = self.verify_targets_metadata(device_manifest.as_ref())?;
        self.personalized_out = self.verify_targets_payloads(&targets, device_manifest.as_ref())?;

        self.verified_targets = Some(targets.serialized_targets_metadata);
        self.bundle_verified = true;
        info!(
            trusted_root_version = ?self.trusted_root_version(),
            "Update bundle verified"
        );
        Ok(())
    }

    fn layout(&self) -> Result<&BundleLayout> {
        self.layout
            .as_ref()
            .ok_or_else(|| UpdateError::failed_precondition("bundle is not open"))
    }

    fn source(&self) -> Result<&Arc<Mutex<dyn SeekableReader>>> {
        self.source
            .as_ref()
            .ok_or_else(|| UpdateError::failed_precondition("bundle is not open"))
    }

    fn read_bundle_range(&self, range: &Range<usize>) -> Result<Vec<u8>> {
        read_range(&mut *self.source()?.lock(), range)
    }

    fn bundle_root(&self) -> Result<Option<SignedRootMetadata>> {
        let Some(range) = self.layout()?.root_metadata.clone() else {
            return Ok(None);
        };
        let bytes = self.read_bundle_range(&range)?;
        SignedRootMetadata::decode(bytes.as_slice())
            .map(Some)
            .map_err(|e| UpdateError::data_loss(format!("bundle root metadata: {e}")))
    }

    fn read_signed_targets(&self) -> Result<SignedTargetsMetadata> {
        let range = self
            .layout()?
            .targets_metadata
            .get(TOP_LEVEL_TARGETS_NAME)
            .cloned()
            .ok_or_else(|| UpdateError::unauthenticated("bundle has no top-level targets metadata"))?;
        let bytes = self.read_bundle_range(&range)?;
        SignedTargetsMetadata::decode(bytes.as_slice())
            .map_err(|e| UpdateError::data_loss(format!("targets metadata: {e}")))
    }

    fn on_device_trusted_root(&self) -> Result<RootMetadata> {
        let bytes = {
            let mut backend = self.backend.lock();
            let mut reader = backend.get_root_metadata_reader().map_err(|e| {
                error!(error = %e, "No on-device trusted root");
                UpdateError::unauthenticated(format!("no on-device trusted root: {e}"))
            })?;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            bytes
        };
        let signed = SignedRootMetadata::decode(bytes.as_slice()).map_err(|e| {
            UpdateError::unauthenticated(format!("on-device trusted root does not decode: {e}"))
        })?;
        decode_root(&signed.serialized_root_metadata).map_err(|e| {
            UpdateError::unauthenticated(format!("on-device trusted root: {}", e.message()))
        })
    }

    /// The manifest of the installed software, if one can be loaded.
    fn on_device_manifest(&self) -> Option<ManifestAccessor> {
        let mut backend = self.backend.lock();
        if let Err(e) = backend.before_manifest_read() {
            warn!(error = %e, "before_manifest_read failed; ignoring on-device manifest");
            return None;
        }
        let mut bytes = Vec::new();
        match backend.get_manifest_reader() {
            Ok(mut reader) => {
                if let Err(e) = reader.read_to_end(&mut bytes) {
                    warn!(error = %e, "Failed to read on-device manifest");
                    return None;
                }
            }
            Err(e) => {
                info!(error = %e, "No on-device manifest");
                return None;
            }
        }
        if bytes.is_empty() {
            info!("On-device manifest is empty");
            return None;
        }
        match ManifestAccessor::decode(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(error = %e, "On-device manifest does not decode; ignoring it");
                None
            }
        }
    }

    fn upgrade_root(&mut self) -> Result<()> {
        let Some(new_signed) = self.bundle_root()? else {
            debug!("Bundle carries no root metadata");
            return Ok(());
        };
        let Some(trusted) = self.trusted_root.as_ref() else {
            return Err(UpdateError::internal("root upgrade without a trusted root"));
        };
        let new_root = decode_root(&new_signed.serialized_root_metadata)
            .map_err(|e| UpdateError::unauthenticated(e.message().to_string()))?;

        // Signed by the current root, then by itself.
        for (signer, label) in [(trusted, "trusted"), (&new_root, "new")] {
            let result = verify_metadata_signatures(
                &new_signed.serialized_root_metadata,
                &new_signed.signatures,
                signer.root_signature_requirement.as_ref(),
                &signer.keys,
            );
            match result {
                Ok(()) => {}
                Err(e) if self.config.self_verification && e.is(ErrorKind::NotFound) => {
                    warn!("Self-verification accepting unsigned root metadata");
                }
                Err(e) => {
                    error!(error = %e, signer = label, "Root metadata signature check failed");
                    return Err(UpdateError::unauthenticated(format!(
                        "root metadata against {label} root: {}",
                        e.message()
                    )));
                }
            }
        }

        let (current, incoming) = (trusted.version(), new_root.version());
        if incoming < current {
            error!(current, incoming, "Root metadata rollback rejected");
            return Err(UpdateError::unauthenticated(format!(
                "root metadata version {incoming} is older than trusted version {current}"
            )));
        }

        self.trusted_root = Some(new_root);
        if self.config.self_verification {
            return Ok(());
        }

        let range = self
            .layout()?
            .root_metadata
            .clone()
            .ok_or_else(|| UpdateError::internal("root metadata range vanished"))?;
        let mut root_reader = IntervalReader::new(Arc::clone(self.source()?), range.start, range.end)?;
        self.backend
            .lock()
            .safely_persist_root_metadata(&mut root_reader)?;
        info!(version = incoming, "Persisted upgraded root metadata");
        Ok(())
    }

    fn verify_targets_metadata(
        &self,
        device_manifest: Option<&ManifestAccessor>,
    ) -> Result<SignedTargetsMetadata> {
        let signed = self.read_signed_targets()?;

        let Some(root) = self.trusted_root.as_ref() else {
            warn!("Self-verification without root metadata; targets signatures not checked");
            return Ok(signed);
        };

        match verify_metadata_signatures(
            &signed.serialized_targets_metadata,
            &signed.signatures,
            root.targets_signature_requirement.as_ref(),
            &root.keys,
        ) {
            Ok(()) => {}
            Err(e) if self.config.self_verification && e.is(ErrorKind::NotFound) => {
                warn!("Self-verification accepting unsigned targets metadata");
                return Ok(signed);
            }
            Err(e) => {
                error!(error = %e, "Targets metadata signature check failed");
                return Err(UpdateError::unauthenticated(format!(
                    "targets metadata: {}",
                    e.message()
                )));
            }
        }

        if self.config.self_verification {
            debug!("Self-verification skips anti-rollback");
            return Ok(signed);
        }

        let incoming = ManifestAccessor::from_targets(signed.serialized_targets_metadata.clone(), None)
            .map_err(|e| UpdateError::unauthenticated(e.message().to_string()))?
            .version();
        match device_manifest {
            Some(device) if device.version() > incoming => {
                error!(device = device.version(), incoming, "Targets metadata rollback rejected");
                Err(UpdateError::unauthenticated(format!(
                    "targets version {incoming} is older than installed version {}",
                    device.version()
                )))
            }
            Some(_) => Ok(signed),
            None => {
                warn!("No on-device manifest; anti-rollback check skipped");
                Ok(signed)
            }
        }
    }

    fn verify_targets_payloads(
        &self,
        signed: &SignedTargetsMetadata,
        device_manifest: Option<&ManifestAccessor>,
    ) -> Result<BTreeSet<String>> {
        let manifest = ManifestAccessor::from_targets(signed.serialized_targets_metadata.clone(), None)
            .map_err(|e| UpdateError::unauthenticated(e.message().to_string()))?;
        let mut personalized_out = BTreeSet::new();
        for target in manifest.target_files() {
            if self.verify_target_payload(target, device_manifest)? == PayloadSource::Device {
                personalized_out.insert(target.file_name.clone());
            }
        }
        Ok(personalized_out)
    }

    fn verify_target_payload(
        &self,
        target: &TargetFile,
        device_manifest: Option<&ManifestAccessor>,
    ) -> Result<PayloadSource> {
        let name = target.file_name.as_str();
        if target.length > self.config.max_target_payload_size {
            error!(target = name, length = target.length, "Target payload too large");
            return Err(UpdateError::out_of_range(format!(
                "target {name} is {} bytes, limit {}",
                target.length, self.config.max_target_payload_size
            )));
        }
        let Some(expected_hash) = target.sha256() else {
            error!(target = name, "Target has no SHA-256 hash");
            return Err(UpdateError::unauthenticated(format!("target {name} has no SHA-256 hash")));
        };

        if let Some(range) = self.layout()?.target_payloads.get(name).cloned() {
            self.verify_in_bundle_payload(name, target.length, expected_hash, range)?;
            return Ok(PayloadSource::Bundle);
        }

        if !self.config.with_personalization {
            error!(target = name, "Target payload missing from bundle");
            return Err(UpdateError::unauthenticated(format!("target {name} payload missing")));
        }
        self.verify_personalized_out_payload(target, expected_hash, device_manifest)?;
        Ok(PayloadSource::Device)
    }

    fn verify_in_bundle_payload(
        &self,
        name: &str,
        length: u64,
        expected_hash: &[u8],
        range: Range<usize>,
    ) -> Result<()> {
        if range.len() as u64 != length {
            error!(target = name, expected = length, actual = range.len(), "Target length mismatch");
            return Err(UpdateError::unauthenticated(format!(
                "target {name} is {} bytes, metadata says {length}",
                range.len()
            )));
        }

        let mut payload = IntervalReader::new(Arc::clone(self.source()?), range.start, range.end)?;
        let mut hasher = Sha256Hasher::new();
        let mut chunk = [0u8; HASH_CHUNK];
        let mut remaining = range.len();
        while remaining > 0 {
            let want = remaining.min(HASH_CHUNK);
            let n = payload.read(&mut chunk[..want])?;
            if n == 0 {
                return Err(UpdateError::internal("payload reader made no progress"));
            }
            hasher.update(&chunk[..n]);
            remaining -= n;
        }
        if !ct_eq(&hasher.finalize(), expected_hash) {
            error!(target = name, "Target hash mismatch");
            return Err(UpdateError::unauthenticated(format!("target {name} hash mismatch")));
        }
        debug!(target = name, length, "Verified in-bundle target payload");
        Ok(())
    }

    fn verify_personalized_out_payload(
        &self,
        target: &TargetFile,
        expected_hash: &[u8],
        device_manifest: Option<&ManifestAccessor>,
    ) -> Result<()> {
        let name = target.file_name.as_str();
        let Some(device) = device_manifest else {
            error!(target = name, "Personalized-out target without on-device manifest");
            return Err(UpdateError::unauthenticated(format!(
                "target {name} is not in the bundle and there is no on-device manifest"
            )));
        };
        let Some(cached) = device.target_file(name) else {
            error!(target = name, "Personalized-out target unknown to the device");
            return Err(UpdateError::unauthenticated(format!(
                "target {name} is not in the bundle or the on-device manifest"
            )));
        };
        let cached_hash = cached.sha256().unwrap_or_default();
        if cached.length != target.length || !ct_eq(cached_hash, expected_hash) {
            error!(target = name, "Personalized-out target measurement mismatch");
            return Err(UpdateError::unauthenticated(format!(
                "target {name} does not match the on-device measurement"
            )));
        }

        self.backend
            .lock()
            .verify_target_file(device, name)
            .map_err(|e| {
                error!(target = name, error = %e, "Backend rejected personalized-out target");
                UpdateError::unauthenticated(format!("target {name}: {}", e.message()))
            })?;
        info!(target = name, "Verified personalized-out target against on-device manifest");
        Ok(())
    }

    fn ensure_verified(&self) -> Result<()> {
        if self.bundle_verified {
            Ok(())
        } else {
            Err(UpdateError::failed_precondition("bundle is not verified"))
        }
    }

    /// Manifest of the verified bundle, including the user manifest.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` unless verified; `NotFound` if verification was
    /// disabled and the bundle has no targets metadata.
    pub fn get_manifest(&self) -> Result<ManifestAccessor> {
        self.ensure_verified()?;
        let targets = self
            .verified_targets
            .clone()
            .ok_or_else(|| UpdateError::not_found("bundle has no targets metadata"))?;
        let user_manifest = match self.layout()?.target_payloads.get(USER_MANIFEST_TARGET_NAME) {
            Some(range) => Some(self.read_bundle_range(range)?),
            None => None,
        };
        ManifestAccessor::from_targets(targets, user_manifest)
    }

    /// Bounded reader over the payload of `target_name`.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` unless verified; `NotFound` if the payload is
    /// not in the bundle.
    pub fn get_target_payload(&self, target_name: &str) -> Result<PayloadReader> {
        self.ensure_verified()?;
        let range = self
            .layout()?
            .target_payloads
            .get(target_name)
            .cloned()
            .ok_or_else(|| UpdateError::not_found(format!("no payload for target {target_name}")))?;
        let source: Arc<Mutex<dyn SeekableReader>> = Arc::clone(self.source()?);
        IntervalReader::new(source, range.start, range.end)
    }

    /// Whether `target_name` was verified as personalized out, i.e. the
    /// device already holds it and the bundle carries no payload.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` unless verified.
    pub fn is_personalized_out(&self, target_name: &str) -> Result<bool> {
        self.ensure_verified()?;
        Ok(self.personalized_out.contains(target_name))
    }

    /// Total size of the in-bundle payloads of manifested targets, excluding
    /// the user manifest.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` unless verified.
    pub fn get_total_payload_size(&self) -> Result<u64> {
        let manifest = self.get_manifest()?;
        let layout = self.layout()?;
        Ok(manifest
            .target_files()
            .iter()
            .filter(|t| t.file_name != USER_MANIFEST_TARGET_NAME)
            .filter_map(|t| layout.target_payloads.get(&t.file_name))
            .map(|r| r.len() as u64)
            .sum())
    }

    /// Replace the on-device manifest with this bundle's.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` unless verified; backend hook errors.
    pub fn persist_manifest(&self) -> Result<()> {
        let manifest = self.get_manifest()?;
        let mut backend = self.backend.lock();
        backend.before_manifest_write()?;
        {
            let mut writer = backend.get_manifest_writer()?;
            manifest.write_to(&mut *writer)?;
        }
        backend.after_manifest_write()?;
        info!(version = manifest.version(), "Persisted manifest");
        Ok(())
    }
}

fn decode_root(serialized: &[u8]) -> Result<RootMetadata> {
    RootMetadata::decode(serialized).map_err(|e| UpdateError::data_loss(format!("root metadata: {e}")))
}

fn p256_public_key(mapping: &KeyMapping) -> Option<&[u8]> {
    let key = mapping.key.as_ref()?;
    (key.key_type() == KeyType::EcdsaSha2Nistp256 && key.scheme() == KeyScheme::EcdsaSha2Nistp256)
        .then_some(key.keyval.as_slice())
}

/// Check that at least `requirement.threshold` distinct allowed keys signed
/// `serialized`.
///
/// # Errors
///
/// `NotFound` when there are no signatures at all, `Unauthenticated` when
/// there are some but too few verify (or the requirement is missing or has a
/// threshold of zero).
pub fn verify_metadata_signatures(
    serialized: &[u8],
    signatures: &[Signature],
    requirement: Option<&SignatureRequirement>,
    keys: &[KeyMapping],
) -> Result<()> {
    if signatures.is_empty() {
        return Err(UpdateError::not_found("metadata has no signatures"));
    }
    let Some(requirement) = requirement else {
        return Err(UpdateError::unauthenticated("no signature requirement for role"));
    };
    let threshold = usize::try_from(requirement.threshold).unwrap_or(usize::MAX);
    if threshold == 0 {
        return Err(UpdateError::unauthenticated("signature threshold of zero is never met"));
    }

    let digest = sha256(serialized);
    let mut counted: Vec<&[u8]> = Vec::new();
    for signature in signatures {
        let key_id = signature.key_id.as_slice();
        if !requirement.key_ids.iter().any(|allowed| ct_eq(allowed, key_id)) {
            debug!("Skipping signature from a key not allowed for this role");
            continue;
        }
        if counted.iter().any(|seen| ct_eq(seen, key_id)) {
            debug!("Skipping duplicate signature");
            continue;
        }
        let Some(public_key) = keys
            .iter()
            .find(|mapping| ct_eq(&mapping.key_id, key_id))
            .and_then(p256_public_key)
        else {
            debug!("Skipping signature with no usable key mapping");
            continue;
        };
        match verify_ecdsa_p256_signature(public_key, &digest, &signature.sig) {
            Ok(()) => {
                counted.push(key_id);
                if counted.len() >= threshold {
                    return Ok(());
                }
            }
            Err(e) => debug!(error = %e, "Signature did not verify"),
        }
    }

    Err(UpdateError::unauthenticated(format!(
        "{} of {threshold} required signatures verified",
        counted.len()
    )))
}
