//! ECDSA P-256 signing and verification over SHA-256 digests
//!
//! Update metadata is signed over the SHA-256 digest of its serialized bytes,
//! so both directions here take a prehashed 32-byte digest. Signatures use
//! the fixed 64-byte `r || s` encoding and public keys the uncompressed
//! 65-byte SEC1 encoding.

use crate::digest::{Sha256Digest, sha256, to_hex};
use crate::error::{CryptoError, CryptoResult};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use tracing::{debug, warn};

/// Length of a raw P-256 private scalar.
pub const PRIVATE_KEY_LEN: usize = 32;

/// Length of an uncompressed SEC1 public key.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Length of a fixed-size `r || s` signature.
pub const SIGNATURE_LEN: usize = 64;

/// Verify `signature` over `digest` with a SEC1-encoded P-256 public key.
///
/// # Errors
///
/// Returns [`CryptoError::KeyFormatError`] for an unparseable key,
/// [`CryptoError::InvalidSignatureLength`] or
/// [`CryptoError::SignatureFormatError`] for a malformed signature, and
/// [`CryptoError::VerificationFailed`] if the signature does not match.
pub fn verify_ecdsa_p256_signature(
    public_key: &[u8],
    digest: &Sha256Digest,
    signature: &[u8],
) -> CryptoResult<()> {
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key).map_err(|e| {
        warn!(key_len = public_key.len(), "Rejected malformed P-256 public key");
        CryptoError::KeyFormatError(format!("P-256 public key: {e}"))
    })?;

    if signature.len() != SIGNATURE_LEN {
        warn!(sig_len = signature.len(), "Rejected signature of wrong length");
        return Err(CryptoError::InvalidSignatureLength {
            expected: SIGNATURE_LEN,
            actual: signature.len(),
        });
    }
    let signature = Signature::from_slice(signature).map_err(|e| {
        warn!("Rejected malformed P-256 signature");
        CryptoError::SignatureFormatError(e.to_string())
    })?;

    verifying_key.verify_prehash(digest, &signature).map_err(|e| {
        debug!(key_id = %to_hex(&key_id(public_key)), "P-256 signature did not verify");
        CryptoError::VerificationFailed(e.to_string())
    })
}

/// Key identifier for a public key: the SHA-256 of its SEC1 bytes.
pub fn key_id(public_key: &[u8]) -> Sha256Digest {
    sha256(public_key)
}

/// A P-256 signing key with its public half.
///
/// Used by tooling and tests to produce signed metadata. Devices only ever
/// verify.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl SigningKeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Load from a raw 32-byte private scalar.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is wrong or the scalar is out of range.
    pub fn from_bytes(private_key: &[u8]) -> CryptoResult<Self> {
        if private_key.len() != PRIVATE_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: PRIVATE_KEY_LEN,
                actual: private_key.len(),
            });
        }
        let signing_key = SigningKey::from_slice(private_key)
            .map_err(|e| CryptoError::KeyFormatError(format!("P-256 private key: {e}")))?;
        let verifying_key = VerifyingKey::from(&signing_key);
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Load from a hex-encoded private scalar. Surrounding whitespace is
    /// ignored so key files with a trailing newline load cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex is malformed or the key is invalid.
    pub fn from_hex(private_key_hex: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(private_key_hex.trim())?;
        Self::from_bytes(&bytes)
    }

    /// Raw private scalar.
    pub fn private_key_bytes(&self) -> [u8; PRIVATE_KEY_LEN] {
        self.signing_key.to_bytes().into()
    }

    /// Hex-encoded private scalar.
    pub fn private_key_hex(&self) -> String {
        to_hex(&self.private_key_bytes())
    }

    /// Uncompressed SEC1 public key (65 bytes, leading `0x04`).
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(false).as_bytes().to_vec()
    }

    /// SHA-256 of [`Self::public_key_sec1`].
    pub fn key_id(&self) -> Sha256Digest {
        key_id(&self.public_key_sec1())
    }

    /// Sign a prehashed SHA-256 digest.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SigningFailed`] if the backend rejects the digest.
    pub fn sign_digest(&self, digest: &Sha256Digest) -> CryptoResult<[u8; SIGNATURE_LEN]> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        Ok(signature.to_bytes().into())
    }

    /// Hash `message` with SHA-256 and sign the digest.
    ///
    /// # Errors
    ///
    /// See [`Self::sign_digest`].
    pub fn sign(&self, message: &[u8]) -> CryptoResult<[u8; SIGNATURE_LEN]> {
        self.sign_digest(&sha256(message))
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("key_id", &to_hex(&self.key_id()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() -> Result<(), CryptoError> {
        let pair = SigningKeyPair::generate();
        let digest = sha256(b"targets metadata");
        let sig = pair.sign_digest(&digest)?;
        verify_ecdsa_p256_signature(&pair.public_key_sec1(), &digest, &sig)
    }

    #[test]
    fn test_wrong_digest_fails() -> Result<(), CryptoError> {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(b"one")?;
        let result = verify_ecdsa_p256_signature(&pair.public_key_sec1(), &sha256(b"two"), &sig);
        assert!(matches!(result, Err(CryptoError::VerificationFailed(_))));
        Ok(())
    }

    #[test]
    fn test_malformed_key_and_signature_are_rejected() -> Result<(), CryptoError> {
        let pair = SigningKeyPair::generate();
        let digest = sha256(b"root metadata");
        let sig = pair.sign_digest(&digest)?;

        let bad_key = verify_ecdsa_p256_signature(&[0x04; 10], &digest, &sig);
        assert!(matches!(bad_key, Err(CryptoError::KeyFormatError(_))));

        let short = verify_ecdsa_p256_signature(&pair.public_key_sec1(), &digest, &sig[..63]);
        assert!(matches!(
            short,
            Err(CryptoError::InvalidSignatureLength {
                expected: 64,
                actual: 63
            })
        ));

        let zeros = verify_ecdsa_p256_signature(&pair.public_key_sec1(), &digest, &[0u8; 64]);
        assert!(matches!(zeros, Err(CryptoError::SignatureFormatError(_))));
        Ok(())
    }

    #[test]
    fn test_public_key_is_uncompressed_sec1() {
        let key = SigningKeyPair::generate().public_key_sec1();
        assert_eq!(key.len(), PUBLIC_KEY_LEN);
        assert_eq!(key.first(), Some(&0x04));
    }

    #[test]
    fn test_hex_round_trip_preserves_identity() -> Result<(), CryptoError> {
        let pair = SigningKeyPair::generate();
        let loaded = SigningKeyPair::from_hex(&format!("{}\n", pair.private_key_hex()))?;
        assert_eq!(loaded.key_id(), pair.key_id());
        Ok(())
    }

    #[test]
    fn test_bad_private_key_length() {
        let result = SigningKeyPair::from_bytes(&[1u8; 16]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let pair = SigningKeyPair::generate();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(&pair.private_key_hex()));
        assert!(rendered.contains(&to_hex(&pair.key_id())));
    }
}
