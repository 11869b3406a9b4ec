//! Cross-module tests: signatures interoperate with key ids and errors map
//! onto the shared status taxonomy.

use proptest::prelude::*;
use updatekit_crypto::prelude::*;
use updatekit_errors::{ErrorKind, UpdateError};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn signature_from_other_key_is_rejected() -> TestResult {
    let signer = SigningKeyPair::generate();
    let other = SigningKeyPair::generate();
    let digest = sha256(b"root metadata v2");
    let sig = signer.sign_digest(&digest)?;

    let err = verify_ecdsa_p256_signature(&other.public_key_sec1(), &digest, &sig)
        .err()
        .map(UpdateError::from);
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Unauthenticated));
    Ok(())
}

#[test]
fn truncated_signature_is_invalid_argument() -> TestResult {
    let signer = SigningKeyPair::generate();
    let digest = sha256(b"payload");
    let sig = signer.sign_digest(&digest)?;

    let err = verify_ecdsa_p256_signature(&signer.public_key_sec1(), &digest, &sig[..63])
        .err()
        .map(UpdateError::from);
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
    Ok(())
}

#[test]
fn garbage_public_key_is_key_format_error() {
    let digest = sha256(b"x");
    let result = verify_ecdsa_p256_signature(&[0u8; 65], &digest, &[0u8; 64]);
    assert!(matches!(result, Err(CryptoError::KeyFormatError(_))));
}

#[test]
fn key_id_is_hash_of_public_key() {
    let pair = SigningKeyPair::generate();
    assert!(ct_eq(&pair.key_id(), &key_id(&pair.public_key_sec1())));
}

#[test]
fn deterministic_key_from_fixed_scalar() -> TestResult {
    let a = SigningKeyPair::from_bytes(&[7u8; 32])?;
    let b = SigningKeyPair::from_bytes(&[7u8; 32])?;
    assert_eq!(a.public_key_sec1(), b.public_key_sec1());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_any_message_round_trips(message in proptest::collection::vec(any::<u8>(), 0..256)) {
        let pair = SigningKeyPair::from_bytes(&[3u8; 32])
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let sig = pair.sign(&message).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let verified = verify_ecdsa_p256_signature(&pair.public_key_sec1(), &sha256(&message), &sig);
        prop_assert!(verified.is_ok());
    }
}
