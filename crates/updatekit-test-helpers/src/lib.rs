//! Shared test utilities for UpdateKit.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`assertions`] - Assertion macros for status-style errors
//! - [`data`] - Deterministic test payload generators
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! updatekit-test-helpers = { workspace = true }
//! ```
//!
//! ```rust,ignore
//! use updatekit_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic, reason = "test-only crate")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod assertions;
pub mod data;
pub mod must;
pub mod prelude;

pub use must::*;
