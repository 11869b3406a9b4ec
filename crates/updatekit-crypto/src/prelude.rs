//! Convenience re-exports for signing and verification

pub use crate::digest::{Sha256Digest, Sha256Hasher, ct_eq, sha256};
pub use crate::ecdsa::{SigningKeyPair, key_id, verify_ecdsa_p256_signature};
pub use crate::error::{CryptoError, CryptoResult};
