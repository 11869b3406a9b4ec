//! Convenience re-exports

pub use crate::borrowable::{Borrowable, BorrowedPointer};
pub use crate::work_queue::{ManualWorkQueue, ThreadWorkQueue, Work, WorkQueue};
