use riscv::mem::VAddr;
use thiserror_no_std::Error;

/// The error returned by chunk and address space operations
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum MmuError {
    #[error("no free run of {frames} contiguous frames is available")]
    Exhausted { frames: usize },
    #[error("a chunk must span at least one byte")]
    EmptyChunk,
    #[error("no free run of directory slots is large enough for the chunk")]
    NoFreeSlot,
    #[error("the directory slots starting at {addr:#x} are occupied or out of range")]
    SlotConflict { addr: VAddr },
    #[error("the directory does not hold the chunk at {addr:#x}")]
    DetachMismatch { addr: VAddr },
    #[error("{addr:#x} is not mapped")]
    NotMapped { addr: VAddr },
    #[error("the operation is not supported")]
    Unsupported,
}

/// The error returned when an [`MmuConfig`](crate::MmuConfig) cannot be used
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("the paging geometry does not match the 4KiB page and 512 entry table layout")]
    UnsupportedGeometry,
    #[error("paging needs at least two levels but {levels} were configured")]
    TooFewLevels { levels: usize },
    #[error("the free physical memory range is empty")]
    EmptyFreeRange,
    #[error("the application range is empty")]
    EmptyAppRange,
    #[error("{addr:#x} is not a canonical virtual address")]
    NonCanonical { addr: VAddr },
}
