//! Accessor and service configuration.

use serde::{Deserialize, Serialize};

/// Default cap on a single target payload (16 MiB).
pub const DEFAULT_MAX_TARGET_PAYLOAD_SIZE: u64 = 16 * 1024 * 1024;

/// Verification policy for an [`UpdateBundleAccessor`](crate::UpdateBundleAccessor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleAccessorConfig {
    /// Verify the bundle against itself instead of the device's trusted
    /// root. Skips anti-rollback and accepts unsigned bundles. For
    /// pre-provisioning checks only.
    pub self_verification: bool,
    /// Accept targets whose payload was stripped from the bundle, checking
    /// them against the on-device manifest instead.
    pub with_personalization: bool,
    /// Largest target payload the device will accept.
    pub max_target_payload_size: u64,
    /// Skip verification entirely. Development builds only.
    pub disable_verification: bool,
}

impl Default for BundleAccessorConfig {
    fn default() -> Self {
        Self {
            self_verification: false,
            with_personalization: true,
            max_target_payload_size: DEFAULT_MAX_TARGET_PAYLOAD_SIZE,
            disable_verification: false,
        }
    }
}

impl BundleAccessorConfig {
    /// Policy for checking a bundle against itself.
    pub fn self_verifying() -> Self {
        Self {
            self_verification: true,
            ..Self::default()
        }
    }
}

/// Limits of the [`BundledUpdateService`](crate::BundledUpdateService)
/// status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Longest accepted bundle filename, in bytes.
    pub max_bundle_filename_len: usize,
    /// Notes longer than this are truncated, in bytes.
    pub max_note_len: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_bundle_filename_len: 32,
            max_note_len: 128,
        }
    }
}
