//! A byte container over a single memory-mapped region where arbitrary
//! ranges can be inserted and removed in sub-linear time.
//!
//! The entire structure lives inside the mapped region: a height-balanced
//! tree of fixed-size blocks augmented with subtree byte counts, and the
//! free-list allocator feeding it. Everything is addressed by `u32`
//! offsets, so closing and reopening a container preserves its state bit
//! for bit, and remapping during growth invalidates nothing.

mod alloc;
mod build;
mod check;
mod edit;
pub mod error;
mod file;
mod header;
mod layout;
mod node;
mod rw;
mod seek;
pub mod seq;
mod space;
mod store;
mod tree;

pub use error::{Error, Result};
pub use file::{FileFormat, ShiftableFile, Stats};
pub use seq::{AvlSeq, Unit, Width};
pub use store::OpenMode;

#[cfg(test)]
mod tests;
