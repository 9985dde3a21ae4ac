//! Paging geometry and board memory layout

use crate::error::ConfigError;
use crate::frames::SearchStrategy;
use riscv::cpu::SatpMode;
use riscv::mem::{
    vaddr_canonicalize, PAddr, PageTable, PhysMapping, VAddr, PAGESIZE, SV39_VADDR_BITS,
};

/// Shape of a page table hierarchy.
///
/// Levels are counted from the leaf: level 0 is a leaf page table whose entries map pages, level 1 holds pointers
/// to leaf tables and so on up to the root at level `levels - 1`.
/// One entry of a level 1 table is called a *slot*; attaching a [`Chunk`](crate::Chunk) claims one slot per leaf
/// table it consists of.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Geometry {
    pub levels: usize,
    pub index_bits: u32,
    pub page_offset_bits: u32,
    pub vaddr_bits: u32,
    pub satp_mode: SatpMode,
}

impl Geometry {
    pub const SV39: Self = Self {
        levels: 3,
        index_bits: 9,
        page_offset_bits: 12,
        vaddr_bits: SV39_VADDR_BITS,
        satp_mode: SatpMode::Sv39,
    };

    pub const SV48: Self = Self {
        levels: 4,
        index_bits: 9,
        page_offset_bits: 12,
        vaddr_bits: 48,
        satp_mode: SatpMode::Sv48,
    };

    pub const fn page_size(&self) -> u64 {
        1 << self.page_offset_bits
    }

    /// Fan-out of every table
    pub const fn entries(&self) -> usize {
        1 << self.index_bits
    }

    /// How many bytes of address space are covered by one entry at `level`
    pub const fn level_span(&self, level: usize) -> u64 {
        1 << (self.page_offset_bits as usize + level * self.index_bits as usize)
    }

    /// How many slots the whole address space has
    pub const fn slots(&self) -> usize {
        1 << ((self.levels - 1) * self.index_bits as usize)
    }

    /// The slot which contains `vaddr`
    pub const fn slot_of(&self, vaddr: VAddr) -> usize {
        (vaddr >> (self.page_offset_bits + self.index_bits)) as usize & (self.slots() - 1)
    }

    /// The canonical virtual address at which `slot` starts
    pub fn slot_addr(&self, slot: usize) -> VAddr {
        self.canonicalize((slot as u64) << (self.page_offset_bits + self.index_bits))
    }

    /// The index into the table at `level` (`level >= 1`) that leads to `slot`
    pub const fn slot_index(&self, slot: usize, level: usize) -> usize {
        (slot >> ((level - 1) * self.index_bits as usize)) & (self.entries() - 1)
    }

    /// The index into the table at `level` that translates `vaddr`
    pub const fn table_index(&self, vaddr: VAddr, level: usize) -> usize {
        (vaddr >> (self.page_offset_bits as usize + level * self.index_bits as usize)) as usize
            & (self.entries() - 1)
    }

    /// Number of pages needed to hold `bytes`
    pub const fn pages(&self, bytes: usize) -> usize {
        bytes.div_ceil(1 << self.page_offset_bits)
    }

    /// Number of leaf tables needed to map `pages`
    pub const fn page_tables(&self, pages: usize) -> usize {
        pages.div_ceil(self.entries())
    }

    pub fn canonicalize(&self, vaddr: VAddr) -> VAddr {
        vaddr_canonicalize(vaddr, self.vaddr_bits)
    }
}

/// Physical and logical memory layout of a board
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryMap {
    pub ram_base: PAddr,
    pub ram_top: PAddr,
    pub mio_base: PAddr,
    pub mio_top: PAddr,
    /// First byte of physical memory that is handed to the frame allocator at boot
    pub free_base: PAddr,
    /// Last byte (exclusive) of physical memory that is handed to the frame allocator at boot
    pub free_top: PAddr,
    /// Lowest address at which application chunks are attached by default
    pub app_low: VAddr,
    pub app_high: VAddr,
    /// Fixed address of the system heap or `None` to place it first-fit
    pub sys_heap: Option<VAddr>,
}

impl MemoryMap {
    pub const SIFIVE_U: Self = {
        const RAM_BASE: u64 = 0x8000_0000;
        const RAM_TOP: u64 = 0x1f_ffff_ffff;
        const STACK_SIZE: u64 = 0x10000;
        const SYS: u64 = (RAM_TOP - RAM_BASE + 1) / 2;
        Self {
            ram_base: RAM_BASE,
            ram_top: RAM_TOP,
            mio_base: 0x0000_0000,
            mio_top: 0x1fff_ffff,
            free_base: RAM_BASE,
            free_top: RAM_TOP + 1 - STACK_SIZE,
            app_low: 0x8040_0000,
            app_high: SYS - 1,
            sys_heap: None,
        }
    };
}

/// Everything that needs to be known about the machine to manage its memory
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MmuConfig {
    pub geometry: Geometry,
    pub memory: MemoryMap,
    /// Default search strategy of frame allocators created for this configuration
    pub strategy: SearchStrategy,
    /// Physical address `p` is loadable at `p + phys_offset`
    pub phys_offset: u64,
    /// Size in bytes of the system heap created during bootstrap
    pub heap_size: usize,
}

impl MmuConfig {
    pub const SIFIVE_U: Self = Self {
        geometry: Geometry::SV39,
        memory: MemoryMap::SIFIVE_U,
        strategy: SearchStrategy::FirstFit,
        phys_offset: 0,
        heap_size: 0x10_0000,
    };

    /// Check that this configuration can be used with the [`PageTable`] layout of the hardware
    pub fn validate(&self) -> Result<(), ConfigError> {
        let geometry = &self.geometry;
        if geometry.entries() != PageTable::ENTRIES || geometry.page_size() != PAGESIZE as u64 {
            return Err(ConfigError::UnsupportedGeometry);
        }
        if geometry.levels < 2 {
            return Err(ConfigError::TooFewLevels {
                levels: geometry.levels,
            });
        }
        if self.memory.free_base >= self.memory.free_top {
            return Err(ConfigError::EmptyFreeRange);
        }
        if self.memory.app_low >= self.memory.app_high {
            return Err(ConfigError::EmptyAppRange);
        }
        if geometry.canonicalize(self.memory.app_low) != self.memory.app_low {
            return Err(ConfigError::NonCanonical {
                addr: self.memory.app_low,
            });
        }
        Ok(())
    }

    /// The translation from physical addresses to addresses that are loadable while this configuration is in effect
    pub const fn mapping(&self) -> PhysMapping {
        PhysMapping::new(self.phys_offset)
    }

    /// The slot from which first-fit attachment starts searching
    pub const fn first_app_slot(&self) -> usize {
        self.geometry.slot_of(self.memory.app_low)
    }
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self::SIFIVE_U
    }
}
