//! Read-only view of targets metadata and the user manifest
//!
//! A [`ManifestAccessor`] is built either from a verified bundle or from the
//! manifest persisted on the device after the last successful update.

use prost::Message;
use updatekit_errors::{Result, UpdateError};
use updatekit_stream::{Reader, Writer};

use crate::proto::{Manifest, TOP_LEVEL_TARGETS_NAME, TargetFile, TargetsMetadata};

/// Target file descriptors, version and user manifest of one update.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestAccessor {
    serialized_targets: Vec<u8>,
    targets: TargetsMetadata,
    user_manifest: Option<Vec<u8>>,
}

impl ManifestAccessor {
    /// Build from serialized top-level targets metadata.
    ///
    /// # Errors
    ///
    /// `DataLoss` if the metadata does not decode.
    pub fn from_targets(serialized_targets: Vec<u8>, user_manifest: Option<Vec<u8>>) -> Result<Self> {
        let targets = TargetsMetadata::decode(serialized_targets.as_slice())
            .map_err(|e| UpdateError::data_loss(format!("targets metadata: {e}")))?;
        Ok(Self {
            serialized_targets,
            targets,
            user_manifest,
        })
    }

    /// Decode a serialized [`Manifest`].
    ///
    /// # Errors
    ///
    /// `DataLoss` if the manifest or its targets metadata does not decode,
    /// or it has no top-level targets entry.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut manifest = Manifest::decode(bytes)
            .map_err(|e| UpdateError::data_loss(format!("manifest: {e}")))?;
        let targets = manifest
            .targets_metadata
            .remove(TOP_LEVEL_TARGETS_NAME)
            .ok_or_else(|| UpdateError::data_loss("manifest has no top-level targets metadata"))?;
        Self::from_targets(targets, manifest.user_manifest)
    }

    /// Read and decode a manifest from `reader`.
    ///
    /// # Errors
    ///
    /// Reader errors, or as [`decode`](Self::decode).
    pub fn read_from(reader: &mut dyn Reader) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::decode(&bytes)
    }

    /// Targets metadata version.
    pub fn version(&self) -> u32 {
        self.targets.version()
    }

    /// Decoded targets metadata.
    pub fn targets_metadata(&self) -> &TargetsMetadata {
        &self.targets
    }

    /// Targets metadata exactly as signed.
    pub fn serialized_targets_metadata(&self) -> &[u8] {
        &self.serialized_targets
    }

    /// All target file descriptors, including the user manifest entry.
    pub fn target_files(&self) -> &[TargetFile] {
        &self.targets.target_files
    }

    /// Descriptor of `name`.
    pub fn target_file(&self, name: &str) -> Option<&TargetFile> {
        self.targets.target_files.iter().find(|f| f.file_name == name)
    }

    /// Opaque product manifest, if any.
    pub fn user_manifest(&self) -> Option<&[u8]> {
        self.user_manifest.as_deref()
    }

    /// The persistable [`Manifest`] message.
    pub fn to_manifest(&self) -> Manifest {
        let mut manifest = Manifest {
            user_manifest: self.user_manifest.clone(),
            ..Manifest::default()
        };
        manifest
            .targets_metadata
            .insert(TOP_LEVEL_TARGETS_NAME.to_string(), self.serialized_targets.clone());
        manifest
    }

    /// Serialized [`Manifest`].
    pub fn encode(&self) -> Vec<u8> {
        self.to_manifest().encode_to_vec()
    }

    /// Write the serialized manifest to `writer`.
    ///
    /// # Errors
    ///
    /// Writer errors.
    pub fn write_to(&self, writer: &mut dyn Writer) -> Result<()> {
        writer.write(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{CommonMetadata, Hash, HashFunction, TARGETS_ROLE};
    use updatekit_errors::ErrorKind;
    use updatekit_stream::MemoryReader;

    fn targets(version: u32) -> Vec<u8> {
        TargetsMetadata {
            common_metadata: Some(CommonMetadata {
                role: TARGETS_ROLE.into(),
                spec_version: "1.0.0".into(),
                version,
            }),
            target_files: vec![TargetFile {
                file_name: "app".into(),
                length: 4,
                hashes: vec![Hash {
                    function: HashFunction::Sha256 as i32,
                    hash: vec![0xAA; 32],
                }],
            }],
        }
        .encode_to_vec()
    }

    #[test]
    fn test_persisted_manifest_reads_back() -> Result<()> {
        let accessor = ManifestAccessor::from_targets(targets(3), Some(b"user".to_vec()))?;
        let mut written = Vec::new();
        accessor.write_to(&mut written)?;

        let restored = ManifestAccessor::read_from(&mut MemoryReader::new(written))?;
        assert_eq!(restored.version(), 3);
        assert_eq!(restored.user_manifest(), Some(&b"user"[..]));
        assert_eq!(restored.target_file("app").map(|f| f.length), Some(4));
        assert_eq!(restored.serialized_targets_metadata(), targets(3).as_slice());
        Ok(())
    }

    #[test]
    fn test_manifest_without_targets_is_data_loss() {
        let bytes = Manifest::default().encode_to_vec();
        assert_eq!(
            ManifestAccessor::decode(&bytes).err().map(|e| e.kind()),
            Some(ErrorKind::DataLoss)
        );
    }

    #[test]
    fn test_garbage_targets_is_data_loss() {
        let result = ManifestAccessor::from_targets(vec![0xFF, 0xFF, 0xFF], None);
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::DataLoss));
    }
}
