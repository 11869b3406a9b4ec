//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use updatekit_test_helpers::prelude::*;
//! ```

pub use crate::data::{chunked, pattern_bytes};
pub use crate::must::{must, must_err, must_some, must_with};
pub use crate::{assert_err, assert_error_kind, assert_ok};

/// Result type for tests that propagate errors with `?`.
pub type TestResult = Result<(), Box<dyn std::error::Error>>;
