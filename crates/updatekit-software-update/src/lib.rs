//! Verified software-update bundles
//!
//! An update bundle carries TUF-style metadata (a signed root of trust and
//! signed targets metadata) together with target payloads. This crate
//! verifies bundles staged on the device and drives them through an update
//! state machine.
//!
//! # Architecture
//!
//! - [`proto`]: protobuf messages of the bundle and manifest formats
//! - [`wire`]: streaming scan of the bundle framing, without buffering
//!   payloads
//! - [`openable`]: [`OpenableReader`] sources (blob store, memory)
//! - [`bundle`]: [`UpdateBundleAccessor`], the verification chain and gated
//!   payload access
//! - [`manifest`]: [`ManifestAccessor`], the record of what is installed
//! - [`backend`]: [`BundledUpdateBackend`], the product integration hooks
//! - [`memory_backend`]: [`InMemoryBackend`] for host tools and tests
//! - [`service`]: [`BundledUpdateService`], the update state machine
//! - [`builder`]: signing and assembly of roots and bundles
//! - [`config`]: verification and service settings
//!
//! # Trust model
//!
//! The device holds a root metadata record. A bundle may carry a newer root
//! signed by both the old and the new root keys; it is persisted as soon as
//! it verifies. Targets metadata must be signed by the root's targets keys
//! and may not go backwards in version. Every payload is checked against
//! the length and SHA-256 recorded in the targets metadata before any of it
//! is handed out.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use prost::Message;
//! use updatekit_crypto::SigningKeyPair;
//! use updatekit_software_update::prelude::*;
//! use updatekit_stream::Reader;
//!
//! # fn main() -> updatekit_errors::Result<()> {
//! let key = SigningKeyPair::from_bytes(&[3u8; 32])?;
//! let root = RootMetadataBuilder::new(1)
//!     .root_key(key.public_key_sec1())
//!     .targets_key(key.public_key_sec1())
//!     .sign(std::slice::from_ref(&key))?;
//! let bundle = UpdateBundleBuilder::new(1)
//!     .target("app", b"firmware".to_vec())
//!     .sign_with(key)
//!     .build_bytes()?;
//!
//! let backend = Arc::new(Mutex::new(InMemoryBackend::with_trusted_root(root.encode_to_vec())));
//! let mut accessor = UpdateBundleAccessor::new(
//!     Box::new(MemoryOpenableReader::new(bundle)),
//!     backend,
//!     BundleAccessorConfig::default(),
//! );
//! accessor.open_and_verify()?;
//!
//! let mut payload = accessor.get_target_payload("app")?;
//! let mut data = Vec::new();
//! payload.read_to_end(&mut data)?;
//! assert_eq!(data, b"firmware");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod builder;
pub mod bundle;
pub mod config;
pub mod manifest;
pub mod memory_backend;
pub mod openable;
pub mod prelude;
pub mod proto;
pub mod service;
pub mod wire;

pub use backend::BundledUpdateBackend;
pub use builder::{RootMetadataBuilder, UpdateBundleBuilder, sign_metadata, sign_root};
pub use bundle::{PayloadReader, UpdateBundleAccessor, verify_metadata_signatures};
pub use config::{BundleAccessorConfig, DEFAULT_MAX_TARGET_PAYLOAD_SIZE, ServiceConfig};
pub use manifest::ManifestAccessor;
pub use memory_backend::{AppliedTarget, BackendHook, InMemoryBackend};
pub use openable::{BlobStoreOpenableReader, MemoryOpenableReader, OpenableReader};
pub use service::{
    BundledUpdateService, BundledUpdateStatus, PROGRESS_COMPLETE, UpdateResult, UpdateState,
};
