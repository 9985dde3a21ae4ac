//! Virtual memory management for Sv39 based RISC-V systems
//!
//! The crate turns flat ranges of physical RAM into
//! - a pool of physical page frames managed by the [`FrameAllocator`],
//! - [`Chunk`]s, i.e. owned spans of memory that are described by a run of leaf page tables,
//! - [`Directory`]s (address spaces) into which chunks are attached at first-fit or fixed virtual slots and which
//!   can be activated on the current hart.
//!
//! Physical memory is never dereferenced directly.
//! All accesses to page tables and free frames go through the [`PhysMapper`](riscv::PhysMapper) of the frame
//! allocator so that the same code works before and after paging is enabled.
#![no_std]

#[cfg(test)]
extern crate std;

pub mod chunk;
pub mod config;
pub mod directory;
mod error;
pub mod flags;
pub mod frames;
pub mod init;
pub mod page_table;

#[cfg(test)]
mod test_utils;

pub use chunk::Chunk;
pub use config::{Geometry, MemoryMap, MmuConfig};
pub use directory::Directory;
pub use error::{ConfigError, MmuError};
pub use flags::Flags;
pub use frames::{FrameAlloc, FrameAllocator, SearchStrategy};
