//! Word-granular synthetic memory and the element packing used to move caller buffers into it.
//!
//! The simulated machine sees memory as a sparse map of 8-byte words. [`SparseMemory`] stores
//! only the words that were written; every other address reads back as zero. Caller buffers are
//! moved in and out through [`pack`] and [`unpack`], which concatenate 1, 2, 4 or 8 byte elements
//! little-endian into [`PackedWord`]s and always produce a tightly packed image, regardless of
//! the row stride of the caller's buffer.
//!
//! All addresses are byte addresses. A word lives at the byte address of its first byte, which
//! must be 8-byte aligned.

#![forbid(unsafe_code)]

mod element;
mod pack;
mod sparse;
mod word;

pub use element::{Element, ElementSink, ElementSource, ElementWidth};
pub use pack::{pack, unpack, BufferShape, ShapeError};
pub use sparse::{MemoryError, MemoryResult, SparseMemory};
pub use word::{PackedWord, WORD_BYTES};
