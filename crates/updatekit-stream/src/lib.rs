//! Byte stream abstractions for UpdateKit
//!
//! The storage and verification layers talk to each other through small
//! status-returning stream traits rather than `std::io`, because the error
//! kinds matter: a reader distinguishes "nothing available right now"
//! (`ResourceExhausted`) from "end of stream" (`OutOfRange`).
//!
//! # Architecture
//!
//! - [`traits`]: [`Reader`], [`Writer`], [`Seek`] and [`SeekableReader`]
//! - [`interval`]: [`IntervalReader`], a bounded view over a shared source
//! - [`memory`]: [`MemoryReader`] and [`MemoryWriter`]
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use updatekit_stream::prelude::*;
//!
//! # fn main() -> updatekit_errors::Result<()> {
//! let source = Arc::new(Mutex::new(MemoryReader::new(b"header|payload|trailer".to_vec())));
//! let mut payload = IntervalReader::new(source, 7, 14)?;
//! let mut out = Vec::new();
//! payload.read_to_end(&mut out)?;
//! assert_eq!(out, b"payload");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod interval;
pub mod memory;
pub mod prelude;
pub mod traits;

pub use interval::IntervalReader;
pub use memory::{MemoryReader, MemoryWriter};
pub use std::io::SeekFrom;
pub use traits::{Reader, Seek, SeekableReader, Writer, resolve_seek};
