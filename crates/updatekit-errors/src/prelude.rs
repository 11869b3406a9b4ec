//! Convenience re-exports for error handling

pub use crate::Result;
pub use crate::status::{ErrorKind, ResultExt, UpdateError};
