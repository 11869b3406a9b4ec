//! Error types for cryptographic operations

use thiserror::Error;
use updatekit_errors::UpdateError;

/// Cryptographic operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Signature did not verify
    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),

    /// Malformed public or private key
    #[error("Key format error: {0}")]
    KeyFormatError(String),

    /// Malformed signature encoding
    #[error("Signature format error: {0}")]
    SignatureFormatError(String),

    /// Invalid key length
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid signature length
    #[error("Invalid signature length: expected {expected} bytes, got {actual}")]
    InvalidSignatureLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Signing failed
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::KeyFormatError(format!("Hex decode error: {e}"))
    }
}

impl From<CryptoError> for UpdateError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::VerificationFailed(_) => UpdateError::unauthenticated(e.to_string()),
            CryptoError::SigningFailed(_) => UpdateError::internal(e.to_string()),
            CryptoError::KeyFormatError(_)
            | CryptoError::SignatureFormatError(_)
            | CryptoError::InvalidKeyLength { .. }
            | CryptoError::InvalidSignatureLength { .. } => {
                UpdateError::invalid_argument(e.to_string())
            }
        }
    }
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use updatekit_errors::ErrorKind;

    #[test]
    fn test_conversion_kinds() {
        let e: UpdateError = CryptoError::VerificationFailed("bad".into()).into();
        assert_eq!(e.kind(), ErrorKind::Unauthenticated);
        let e: UpdateError = CryptoError::InvalidKeyLength {
            expected: 65,
            actual: 3,
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
    }
}
