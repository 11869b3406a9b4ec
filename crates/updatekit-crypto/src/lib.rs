//! Cryptographic primitives for UpdateKit metadata verification
//!
//! Bundles carry root and targets metadata signed with ECDSA over NIST P-256
//! and payloads hashed with SHA-256. This crate wraps the RustCrypto
//! implementations behind a small API tuned to that format.
//!
//! # Architecture
//!
//! - [`digest`]: one-shot and incremental SHA-256, constant-time comparison
//! - [`ecdsa`]: prehash P-256 verification and a [`SigningKeyPair`] for tooling
//! - [`error`]: [`CryptoError`] and its mapping onto `UpdateError`
//!
//! # Security Considerations
//!
//! - Digests and key ids must be compared with [`digest::ct_eq`]
//! - Private key material is never printed by `Debug`
//! - Key generation uses the operating system RNG
//!
//! # Example
//!
//! ```
//! use updatekit_crypto::prelude::*;
//!
//! let pair = SigningKeyPair::generate();
//! let digest = sha256(b"signed metadata");
//! let signature = pair.sign_digest(&digest)?;
//! verify_ecdsa_p256_signature(&pair.public_key_sec1(), &digest, &signature)?;
//! # Ok::<(), CryptoError>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod digest;
pub mod ecdsa;
pub mod error;
pub mod prelude;

pub use digest::{Sha256Digest, Sha256Hasher, ct_eq, sha256, to_hex};
pub use ecdsa::{
    PRIVATE_KEY_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN, SigningKeyPair, key_id,
    verify_ecdsa_p256_signature,
};
pub use error::{CryptoError, CryptoResult};
