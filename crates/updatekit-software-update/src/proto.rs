//! Protobuf messages of the update bundle format
//!
//! Mirrors `proto/update_bundle.proto`. Signed metadata is carried as
//! serialized bytes so signatures are always checked over exactly what the
//! signer produced.

use std::collections::BTreeMap;

/// Name of the top-level targets metadata entry.
pub const TOP_LEVEL_TARGETS_NAME: &str = "targets";

/// Reserved target carrying an opaque product manifest.
pub const USER_MANIFEST_TARGET_NAME: &str = "user_manifest";

/// Role string of root metadata.
pub const ROOT_ROLE: &str = "root";

/// Role string of targets metadata.
pub const TARGETS_ROLE: &str = "targets";

/// Metadata format version written by this crate.
pub const SPEC_VERSION: &str = "1.0.0";

/// Hash function of a [`Hash`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum HashFunction {
    /// Unset or unknown
    Unknown = 0,
    /// SHA-256
    Sha256 = 1,
}

/// Public key algorithm of a [`Key`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum KeyType {
    /// Unset or unknown
    Unknown = 0,
    /// ECDSA over NIST P-256
    EcdsaSha2Nistp256 = 1,
}

/// Signature scheme of a [`Key`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum KeyScheme {
    /// Unset or unknown
    Unknown = 0,
    /// ECDSA over NIST P-256 with SHA-256
    EcdsaSha2Nistp256 = 1,
}

/// A digest of a target file.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Hash {
    /// Hash function
    #[prost(enumeration = "HashFunction", tag = "1")]
    pub function: i32,
    /// Digest bytes
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

/// A file listed in targets metadata.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TargetFile {
    /// Name, unique within the bundle
    #[prost(string, tag = "1")]
    pub file_name: String,
    /// Payload length in bytes
    #[prost(uint64, tag = "2")]
    pub length: u64,
    /// Payload digests
    #[prost(message, repeated, tag = "3")]
    pub hashes: Vec<Hash>,
}

impl TargetFile {
    /// The SHA-256 digest, if listed.
    pub fn sha256(&self) -> Option<&[u8]> {
        self.hashes
            .iter()
            .find(|h| h.function() == HashFunction::Sha256)
            .map(|h| h.hash.as_slice())
    }
}

/// Fields common to every metadata role.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CommonMetadata {
    /// Role name
    #[prost(string, tag = "1")]
    pub role: String,
    /// Metadata format version
    #[prost(string, tag = "2")]
    pub spec_version: String,
    /// Monotonic metadata version
    #[prost(uint32, tag = "3")]
    pub version: u32,
}

/// Targets metadata: the list of files an update installs.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TargetsMetadata {
    /// Common fields
    #[prost(message, optional, tag = "1")]
    pub common_metadata: Option<CommonMetadata>,
    /// Files
    #[prost(message, repeated, tag = "2")]
    pub target_files: Vec<TargetFile>,
}

impl TargetsMetadata {
    /// Version, zero when unset.
    pub fn version(&self) -> u32 {
        self.common_metadata.as_ref().map_or(0, |c| c.version)
    }
}

/// A public key.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Key {
    /// Algorithm
    #[prost(enumeration = "KeyType", tag = "1")]
    pub key_type: i32,
    /// Signature scheme
    #[prost(enumeration = "KeyScheme", tag = "2")]
    pub scheme: i32,
    /// Uncompressed SEC1 public key
    #[prost(bytes = "vec", tag = "3")]
    pub keyval: Vec<u8>,
}

/// Maps a key id to a key.
#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyMapping {
    /// SHA-256 of the key's SEC1 bytes
    #[prost(bytes = "vec", tag = "1")]
    pub key_id: Vec<u8>,
    /// The key
    #[prost(message, optional, tag = "2")]
    pub key: Option<Key>,
}

/// Which keys may sign a role, and how many must.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignatureRequirement {
    /// Allowed key ids
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub key_ids: Vec<Vec<u8>>,
    /// Number of distinct allowed keys that must verify
    #[prost(uint32, tag = "2")]
    pub threshold: u32,
}

/// Root of trust: keys and per-role signature requirements.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RootMetadata {
    /// Common fields
    #[prost(message, optional, tag = "1")]
    pub common_metadata: Option<CommonMetadata>,
    /// Unused; kept for schema compatibility
    #[prost(bool, tag = "2")]
    pub consistent_snapshot: bool,
    /// Key id to key table
    #[prost(message, repeated, tag = "3")]
    pub keys: Vec<KeyMapping>,
    /// Requirement for signing the next root
    #[prost(message, optional, tag = "4")]
    pub root_signature_requirement: Option<SignatureRequirement>,
    /// Requirement for signing top-level targets
    #[prost(message, optional, tag = "5")]
    pub targets_signature_requirement: Option<SignatureRequirement>,
}

impl RootMetadata {
    /// Version, zero when unset.
    pub fn version(&self) -> u32 {
        self.common_metadata.as_ref().map_or(0, |c| c.version)
    }
}

/// One signature over serialized metadata.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Signature {
    /// Signing key id
    #[prost(bytes = "vec", tag = "1")]
    pub key_id: Vec<u8>,
    /// Raw `r || s`
    #[prost(bytes = "vec", tag = "2")]
    pub sig: Vec<u8>,
}

/// Serialized root metadata and its signatures.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignedRootMetadata {
    /// Serialized [`RootMetadata`]
    #[prost(bytes = "vec", tag = "1")]
    pub serialized_root_metadata: Vec<u8>,
    /// Signatures over `serialized_root_metadata`
    #[prost(message, repeated, tag = "2")]
    pub signatures: Vec<Signature>,
}

/// Serialized targets metadata and its signatures.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignedTargetsMetadata {
    /// Serialized [`TargetsMetadata`]
    #[prost(bytes = "vec", tag = "1")]
    pub serialized_targets_metadata: Vec<u8>,
    /// Signatures over `serialized_targets_metadata`
    #[prost(message, repeated, tag = "2")]
    pub signatures: Vec<Signature>,
}

/// A complete update bundle.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateBundle {
    /// Optional replacement root
    #[prost(message, optional, tag = "1")]
    pub root_metadata: Option<SignedRootMetadata>,
    /// Targets metadata by role name; only `"targets"` is consulted
    #[prost(btree_map = "string, message", tag = "2")]
    pub targets_metadata: BTreeMap<String, SignedTargetsMetadata>,
    /// Payload bytes by target file name
    #[prost(btree_map = "string, bytes", tag = "3")]
    pub target_payloads: BTreeMap<String, Vec<u8>>,
}

/// The on-device record of the installed update.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Manifest {
    /// Serialized [`TargetsMetadata`] by role name
    #[prost(btree_map = "string, bytes", tag = "1")]
    pub targets_metadata: BTreeMap<String, Vec<u8>>,
    /// Opaque product manifest
    #[prost(bytes = "vec", optional, tag = "2")]
    pub user_manifest: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_target_file_sha256_lookup() {
        let file = TargetFile {
            file_name: "app".into(),
            length: 3,
            hashes: vec![Hash {
                function: HashFunction::Sha256 as i32,
                hash: vec![1, 2, 3],
            }],
        };
        assert_eq!(file.sha256(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_unknown_hash_function_is_ignored() {
        let file = TargetFile {
            file_name: "app".into(),
            length: 3,
            hashes: vec![Hash {
                function: 7,
                hash: vec![1],
            }],
        };
        assert_eq!(file.sha256(), None);
    }

    #[test]
    fn test_manifest_targets_decode_as_embedded_message() -> Result<(), prost::DecodeError> {
        let targets = TargetsMetadata {
            common_metadata: Some(CommonMetadata {
                role: TARGETS_ROLE.into(),
                spec_version: SPEC_VERSION.into(),
                version: 4,
            }),
            target_files: vec![],
        };
        let mut manifest = Manifest::default();
        manifest
            .targets_metadata
            .insert(TOP_LEVEL_TARGETS_NAME.into(), targets.encode_to_vec());
        let decoded = Manifest::decode(manifest.encode_to_vec().as_slice())?;
        let bytes = decoded
            .targets_metadata
            .get(TOP_LEVEL_TARGETS_NAME)
            .cloned()
            .unwrap_or_default();
        assert_eq!(TargetsMetadata::decode(bytes.as_slice())?.version(), 4);
        Ok(())
    }
}
