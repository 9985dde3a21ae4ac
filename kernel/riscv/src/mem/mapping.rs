//! Translation of physical addresses into addresses that are loadable right now

use crate::mem::paddr::PAddr;
use crate::PhysMapper;

/// Description of where physical memory is loadable from.
///
/// Physical address `p` is loadable at `p + offset` (wrapping).
/// An offset of zero describes identity mapped physical memory as it exists while paging is disabled.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PhysMapping {
    pub offset: u64,
}

impl PhysMapping {
    /// Return the mapping which describes addresses being identity-mapped.
    /// That is, physical addresses can be loaded from their value directly and do not need to be
    /// mapped.
    pub const fn identity() -> Self {
        Self { offset: 0 }
    }

    /// Create a new instance describing physical address `0x0` being loadable from `offset`.
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Resolve the given physical address into its loadable mapped variant.
    pub const fn map(&self, addr: PAddr) -> u64 {
        addr.wrapping_add(self.offset)
    }

    /// Reverse-resolve the given mapped address to its actual hardware address.
    pub const fn rev_map(&self, addr: u64) -> PAddr {
        addr.wrapping_sub(self.offset)
    }
}

impl Default for PhysMapping {
    fn default() -> Self {
        Self::identity()
    }
}

unsafe impl PhysMapper for PhysMapping {
    unsafe fn phys_to_mapped_mut<T>(&self, phys: *mut T) -> *mut T {
        self.map(phys as u64) as *mut T
    }

    unsafe fn phys_to_mapped<T>(&self, phys: *const T) -> *const T {
        self.map(phys as u64) as *const T
    }

    unsafe fn mapped_to_phys_mut<T>(&self, mapped: *mut T) -> *mut T {
        self.rev_map(mapped as u64) as *mut T
    }

    unsafe fn mapped_to_phys<T>(&self, mapped: *const T) -> *const T {
        self.rev_map(mapped as u64) as *const T
    }
}
