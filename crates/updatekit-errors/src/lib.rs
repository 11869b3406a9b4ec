//! Status-style error taxonomy for UpdateKit
//!
//! Every crate in the workspace reports failures through [`UpdateError`]. The
//! variants mirror the status codes used by flash storage and update
//! verification code on embedded targets, so a caller can tell a transient
//! condition (retry later) apart from a terminal one (re-stage the bundle).
//!
//! # Architecture
//!
//! - [`status`]: the [`UpdateError`] enum and its [`ErrorKind`] classification
//! - [`prelude`]: convenience re-exports
//!
//! # Example
//!
//! ```
//! use updatekit_errors::prelude::*;
//!
//! fn reserve(free: usize, wanted: usize) -> Result<()> {
//!     if wanted > free {
//!         return Err(UpdateError::resource_exhausted(format!(
//!             "{wanted} bytes requested, {free} free"
//!         )));
//!     }
//!     Ok(())
//! }
//!
//! let err = reserve(4, 8).err();
//! assert!(err.is_some_and(|e| e.is_retryable()));
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod prelude;
pub mod status;

pub use status::{ErrorKind, ResultExt, UpdateError};

/// A specialized `Result` type for UpdateKit operations.
pub type Result<T> = std::result::Result<T, UpdateError>;
