//! Host side stand-ins for physical memory

use crate::config::MmuConfig;
use crate::directory::Directory;
use crate::frames::{FrameAlloc, FrameAllocator, SearchStrategy};
use riscv::mem::{MemoryPage, PAddr, PhysMapping, PAGESIZE};
use std::vec;
use std::vec::Vec;

/// The physical address at which test memory pretends to start
pub const TEST_RAM_BASE: PAddr = 0x8000_0000;

/// A page aligned buffer that is addressed as if it was physical RAM starting at [`TEST_RAM_BASE`]
pub struct TestMemory {
    _pages: Vec<MemoryPage>,
    base: *mut MemoryPage,
    len: usize,
}

impl TestMemory {
    pub fn new(pages: usize) -> Self {
        let mut backing = vec![MemoryPage::default(); pages];
        let base = backing.as_mut_ptr();
        Self {
            _pages: backing,
            base,
            len: pages,
        }
    }

    pub fn mapping(&self) -> PhysMapping {
        PhysMapping::new((self.base as u64).wrapping_sub(TEST_RAM_BASE))
    }

    pub fn end(&self) -> PAddr {
        TEST_RAM_BASE + (self.len * PAGESIZE) as u64
    }

    /// An allocator that knows no free memory yet
    pub fn empty_allocator(&self, strategy: SearchStrategy) -> FrameAllocator<PhysMapping> {
        FrameAllocator::new(self.mapping(), strategy)
    }

    /// An allocator to which the whole buffer has been handed
    pub fn allocator(&self, strategy: SearchStrategy) -> FrameAllocator<PhysMapping> {
        let frames = self.empty_allocator(strategy);
        unsafe { frames.free(TEST_RAM_BASE, self.len) };
        frames
    }
}

/// Allocate an empty root table and wrap it as the master directory
pub fn master_directory<A: FrameAlloc>(frames: &A, config: MmuConfig) -> Directory<'_, A> {
    let root = frames.calloc(1).unwrap();
    unsafe { Directory::from_root(frames, root, config) }
}
