//! Synchronization primitives for UpdateKit
//!
//! # Architecture
//!
//! - [`borrowable`]: [`Borrowable`] shares a mutable object between owners;
//!   [`Borrowable::acquire`] hands out a scoped [`BorrowedPointer`]
//! - [`work_queue`]: the [`WorkQueue`] trait plus a thread-backed and a
//!   manually-drained implementation
//!
//! # Example
//!
//! ```
//! use updatekit_sync::prelude::*;
//!
//! let counter = Borrowable::new(0u32);
//! let shared = counter.clone();
//! {
//!     let mut value = shared.acquire();
//!     *value += 1;
//! }
//! assert_eq!(*counter.acquire(), 1);
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod borrowable;
pub mod prelude;
pub mod work_queue;

pub use borrowable::{Borrowable, BorrowedPointer};
pub use work_queue::{ManualWorkQueue, ThreadWorkQueue, Work, WorkQueue};
