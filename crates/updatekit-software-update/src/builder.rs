//! Construction and signing of root metadata and update bundles
//!
//! Used by `bundlectl` and by tests; devices never sign anything.

use prost::Message;
use updatekit_crypto::{SigningKeyPair, sha256};
use updatekit_errors::{Result, UpdateError};

use crate::manifest::ManifestAccessor;
use crate::proto::{
    CommonMetadata, Hash, HashFunction, Key, KeyMapping, KeyScheme, KeyType, ROOT_ROLE,
    RootMetadata, SPEC_VERSION, Signature, SignatureRequirement, SignedRootMetadata,
    SignedTargetsMetadata, TARGETS_ROLE, TOP_LEVEL_TARGETS_NAME, TargetFile, TargetsMetadata,
    USER_MANIFEST_TARGET_NAME, UpdateBundle,
};

/// Sign `serialized` metadata with each of `signers`.
///
/// # Errors
///
/// `Internal` if a signer fails.
pub fn sign_metadata(serialized: &[u8], signers: &[SigningKeyPair]) -> Result<Vec<Signature>> {
    let digest = sha256(serialized);
    signers
        .iter()
        .map(|signer| -> Result<Signature> {
            Ok(Signature {
                key_id: signer.key_id().to_vec(),
                sig: signer.sign_digest(&digest)?.to_vec(),
            })
        })
        .collect()
}

fn common(role: &str, version: u32) -> CommonMetadata {
    CommonMetadata {
        role: role.to_string(),
        spec_version: SPEC_VERSION.to_string(),
        version,
    }
}

/// Builds [`RootMetadata`] from public keys.
#[derive(Debug, Clone, Default)]
pub struct RootMetadataBuilder {
    version: u32,
    root_keys: Vec<Vec<u8>>,
    targets_keys: Vec<Vec<u8>>,
    root_threshold: u32,
    targets_threshold: u32,
}

impl RootMetadataBuilder {
    /// Empty root at `version`, thresholds of one.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            root_threshold: 1,
            targets_threshold: 1,
            ..Self::default()
        }
    }

    /// Allow a SEC1 public key to sign root metadata.
    #[must_use]
    pub fn root_key(mut self, public_key: impl Into<Vec<u8>>) -> Self {
        self.root_keys.push(public_key.into());
        self
    }

    /// Allow a SEC1 public key to sign targets metadata.
    #[must_use]
    pub fn targets_key(mut self, public_key: impl Into<Vec<u8>>) -> Self {
        self.targets_keys.push(public_key.into());
        self
    }

    /// Signatures required on the next root.
    #[must_use]
    pub fn root_threshold(mut self, threshold: u32) -> Self {
        self.root_threshold = threshold;
        self
    }

    /// Signatures required on targets metadata.
    #[must_use]
    pub fn targets_threshold(mut self, threshold: u32) -> Self {
        self.targets_threshold = threshold;
        self
    }

    /// Assemble the metadata. Keys listed for both roles share one mapping.
    pub fn build(&self) -> RootMetadata {
        let mut keys: Vec<KeyMapping> = Vec::new();
        for public_key in self.root_keys.iter().chain(&self.targets_keys) {
            let key_id = sha256(public_key).to_vec();
            if keys.iter().any(|k| k.key_id == key_id) {
                continue;
            }
            keys.push(KeyMapping {
                key_id,
                key: Some(Key {
                    key_type: KeyType::EcdsaSha2Nistp256 as i32,
                    scheme: KeyScheme::EcdsaSha2Nistp256 as i32,
                    keyval: public_key.clone(),
                }),
            });
        }
        let requirement = |public_keys: &[Vec<u8>], threshold| SignatureRequirement {
            key_ids: public_keys.iter().map(|k| sha256(k).to_vec()).collect(),
            threshold,
        };
        RootMetadata {
            common_metadata: Some(common(ROOT_ROLE, self.version)),
            consistent_snapshot: false,
            keys,
            root_signature_requirement: Some(requirement(&self.root_keys, self.root_threshold)),
            targets_signature_requirement: Some(requirement(
                &self.targets_keys,
                self.targets_threshold,
            )),
        }
    }

    /// Build and sign with `signers`.
    ///
    /// # Errors
    ///
    /// As [`sign_metadata`].
    pub fn sign(&self, signers: &[SigningKeyPair]) -> Result<SignedRootMetadata> {
        sign_root(&self.build(), signers)
    }
}

/// Serialize and sign root metadata.
///
/// # Errors
///
/// As [`sign_metadata`].
pub fn sign_root(root: &RootMetadata, signers: &[SigningKeyPair]) -> Result<SignedRootMetadata> {
    let serialized_root_metadata = root.encode_to_vec();
    let signatures = sign_metadata(&serialized_root_metadata, signers)?;
    Ok(SignedRootMetadata {
        serialized_root_metadata,
        signatures,
    })
}

#[derive(Debug, Clone)]
struct PendingTarget {
    name: String,
    payload: Vec<u8>,
    in_bundle: bool,
}

/// Builds a signed [`UpdateBundle`].
#[derive(Debug, Clone, Default)]
pub struct UpdateBundleBuilder {
    targets_version: u32,
    root: Option<SignedRootMetadata>,
    targets: Vec<PendingTarget>,
    signers: Vec<SigningKeyPair>,
}

impl UpdateBundleBuilder {
    /// Bundle whose targets metadata has `targets_version`.
    pub fn new(targets_version: u32) -> Self {
        Self {
            targets_version,
            ..Self::default()
        }
    }

    /// Carry a (possibly rotated) root.
    #[must_use]
    pub fn root(mut self, root: SignedRootMetadata) -> Self {
        self.root = Some(root);
        self
    }

    /// Add a target whose payload ships in the bundle.
    #[must_use]
    pub fn target(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.targets.push(PendingTarget {
            name: name.into(),
            payload: payload.into(),
            in_bundle: true,
        });
        self
    }

    /// Add a target that is measured into the metadata but whose payload is
    /// left out of the bundle.
    #[must_use]
    pub fn personalized_out_target(
        mut self,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        self.targets.push(PendingTarget {
            name: name.into(),
            payload: payload.into(),
            in_bundle: false,
        });
        self
    }

    /// Ship an opaque product manifest as the reserved user manifest target.
    #[must_use]
    pub fn user_manifest(self, manifest: impl Into<Vec<u8>>) -> Self {
        self.target(USER_MANIFEST_TARGET_NAME, manifest)
    }

    /// Sign the targets metadata with `signer`.
    #[must_use]
    pub fn sign_with(mut self, signer: SigningKeyPair) -> Self {
        self.signers.push(signer);
        self
    }

    /// The targets metadata this bundle will carry.
    pub fn targets_metadata(&self) -> TargetsMetadata {
        TargetsMetadata {
            common_metadata: Some(common(TARGETS_ROLE, self.targets_version)),
            target_files: self
                .targets
                .iter()
                .map(|t| TargetFile {
                    file_name: t.name.clone(),
                    length: t.payload.len() as u64,
                    hashes: vec![Hash {
                        function: HashFunction::Sha256 as i32,
                        hash: sha256(&t.payload).to_vec(),
                    }],
                })
                .collect(),
        }
    }

    /// Assemble and sign the bundle.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` on duplicate target names; signing errors.
    pub fn build(&self) -> Result<UpdateBundle> {
        let mut bundle = UpdateBundle {
            root_metadata: self.root.clone(),
            ..UpdateBundle::default()
        };
        for target in &self.targets {
            if self.targets.iter().filter(|t| t.name == target.name).count() > 1 {
                return Err(UpdateError::invalid_argument(format!(
                    "duplicate target {}",
                    target.name
                )));
            }
            if target.in_bundle {
                bundle
                    .target_payloads
                    .insert(target.name.clone(), target.payload.clone());
            }
        }

        let serialized_targets_metadata = self.targets_metadata().encode_to_vec();
        let signatures = sign_metadata(&serialized_targets_metadata, &self.signers)?;
        bundle.targets_metadata.insert(
            TOP_LEVEL_TARGETS_NAME.to_string(),
            SignedTargetsMetadata {
                serialized_targets_metadata,
                signatures,
            },
        );
        Ok(bundle)
    }

    /// Assemble, sign and serialize the bundle.
    ///
    /// # Errors
    ///
    /// As [`build`](Self::build).
    pub fn build_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.build()?.encode_to_vec())
    }

    /// Serialized manifest a device would hold after installing this bundle.
    ///
    /// # Errors
    ///
    /// `DataLoss` if the metadata does not round-trip.
    pub fn device_manifest(&self) -> Result<Vec<u8>> {
        let user_manifest = self
            .targets
            .iter()
            .find(|t| t.name == USER_MANIFEST_TARGET_NAME)
            .map(|t| t.payload.clone());
        Ok(ManifestAccessor::from_targets(self.targets_metadata().encode_to_vec(), user_manifest)?.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_key_has_one_mapping() {
        let key = SigningKeyPair::from_bytes(&[5u8; 32]).map(|k| k.public_key_sec1());
        let key = key.unwrap_or_default();
        let root = RootMetadataBuilder::new(1)
            .root_key(key.clone())
            .targets_key(key)
            .build();
        assert_eq!(root.keys.len(), 1);
        assert_eq!(root.version(), 1);
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let result = UpdateBundleBuilder::new(1)
            .target("a", b"1".to_vec())
            .target("a", b"2".to_vec())
            .build();
        assert!(matches!(result, Err(UpdateError::InvalidArgument(_))));
    }

    #[test]
    fn test_personalized_out_payload_is_stripped() -> Result<()> {
        let bundle = UpdateBundleBuilder::new(2)
            .target("kept", b"in".to_vec())
            .personalized_out_target("stripped", b"out".to_vec())
            .build()?;
        assert!(bundle.target_payloads.contains_key("kept"));
        assert!(!bundle.target_payloads.contains_key("stripped"));
        let targets = bundle
            .targets_metadata
            .get(TOP_LEVEL_TARGETS_NAME)
            .map(|t| t.serialized_targets_metadata.clone())
            .unwrap_or_default();
        let targets = TargetsMetadata::decode(targets.as_slice())
            .map_err(|e| UpdateError::data_loss(e.to_string()))?;
        assert_eq!(targets.target_files.len(), 2);
        Ok(())
    }
}
