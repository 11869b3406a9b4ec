//! Convenience re-exports

pub use crate::interval::IntervalReader;
pub use crate::memory::{MemoryReader, MemoryWriter};
pub use crate::traits::{Reader, Seek, SeekableReader, Writer};
pub use std::io::SeekFrom;
