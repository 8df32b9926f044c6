//! Stage a native function call into a simulated machine, run it, and unstage the results.
//!
//! This crate re-exports the bridge ([`svbridge_core`]) and the memory and packing layer
//! ([`svbridge_mem`]) under one name.

#![forbid(unsafe_code)]

pub use svbridge_core::*;
pub use svbridge_mem::{
    pack, unpack, ElementSink, ElementSource, MemoryError, PackedWord, ShapeError, WORD_BYTES,
};

pub use svbridge_mem as mem;
