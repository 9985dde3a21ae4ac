//! Address spaces composed of [`Chunk`]s
//!
//! A [`Directory`] is the root of a page table hierarchy.
//! Chunks are attached into *slots*, i.e. entries of the tables one level above the leaf tables.
//! Every leaf table of a chunk occupies one slot so a chunk of `n` tables claims `n` consecutive slots.
//! These may belong to different intermediate tables when the run crosses a table boundary.
//!
//! Intermediate tables that a directory allocates are tagged with the [`OWNED`] software bit.
//! When a private directory is created from the master directory the tag is stripped from the copied entries, so
//! the kernel's tables are shared but never freed by a private directory.
//! Attaching into such a shared table first replaces it with a private copy.

use crate::chunk::Chunk;
use crate::config::MmuConfig;
use crate::error::MmuError;
use crate::frames::FrameAlloc;
use core::fmt::{Debug, Formatter};
use riscv::cpu::{Satp, SatpData};
use riscv::mem::{
    paddr_from_ppn, paddr_ppn, vaddr_is_canonical, EntryFlags, PAddr, PageTable, PageTableEntry,
    VAddr, PAGESIZE,
};
use riscv::PhysMapper;

/// Software bit marking directory level tables that belong to the directory holding the entry
pub const OWNED: EntryFlags = EntryFlags::CUSTOM1;

const PAGE: u64 = PAGESIZE as u64;

/// Result of looking up the entry responsible for a slot
enum Slot {
    /// An intermediate table on the way to the slot does not exist
    Unbacked,
    /// A huge page leaf covers the slot
    Blocked,
    Entry(*mut PageTableEntry),
}

/// An address space.
///
/// Attaching and detaching requires `&mut self`; a directory that is shared between harts must be wrapped in a lock.
pub struct Directory<'a, A: FrameAlloc> {
    frames: &'a A,
    root: PAddr,
    owns_root: bool,
    config: MmuConfig,
}

impl<'a, A: FrameAlloc> Directory<'a, A> {
    /// Create a private address space that shares all mappings of `master`
    pub fn new(frames: &'a A, master: &Directory<'_, A>) -> Result<Self, MmuError> {
        let root = frames.calloc(1).ok_or(MmuError::Exhausted { frames: 1 })?;
        let dir = Self {
            frames,
            root,
            owns_root: true,
            config: master.config,
        };
        unsafe { copy_shared(master.table(master.root), dir.table(root)) };
        log::debug!(
            "created address space {root:#x} from master {:#x}",
            master.root
        );
        Ok(dir)
    }

    /// Wrap an existing root table without taking ownership of it.
    ///
    /// # Safety
    /// `root` must be an initialized page table that is loadable through the mapper of `frames` and outlives the
    /// directory.
    pub unsafe fn from_root(frames: &'a A, root: PAddr, config: MmuConfig) -> Self {
        Self {
            frames,
            root,
            owns_root: false,
            config,
        }
    }

    /// Wrap the root table that is currently installed in the `satp` register.
    ///
    /// # Safety
    /// See [`from_root()`](Directory::from_root).
    pub unsafe fn current(frames: &'a A, config: MmuConfig) -> Self {
        let root = paddr_from_ppn(Satp::read().ppn);
        Self::from_root(frames, root, config)
    }

    /// Physical address of the root table
    pub fn pd(&self) -> PAddr {
        self.root
    }

    pub fn config(&self) -> &MmuConfig {
        &self.config
    }

    pub fn owns_root(&self) -> bool {
        self.owns_root
    }

    unsafe fn table<'t>(&self, addr: PAddr) -> &'t mut PageTable {
        &mut *self
            .frames
            .mapper()
            .phys_to_mapped_mut(addr as *mut PageTable)
    }

    fn lookup(&self, slot: usize) -> Slot {
        let geometry = self.config.geometry;
        let mut table = self.root;
        for level in (2..geometry.levels).rev() {
            let entry = unsafe { &self.table(table).entries[geometry.slot_index(slot, level)] };
            if !entry.is_valid() {
                return Slot::Unbacked;
            }
            if entry.is_leaf() {
                return Slot::Blocked;
            }
            table = entry.addr();
        }
        Slot::Entry(unsafe { &mut self.table(table).entries[geometry.slot_index(slot, 1)] as *mut _ })
    }

    fn is_free(&self, slot: usize) -> bool {
        match self.lookup(slot) {
            Slot::Unbacked => true,
            Slot::Blocked => false,
            Slot::Entry(entry) => unsafe { !(*entry).is_valid() },
        }
    }

    /// Whether `count` slots starting at `first` lie within the address space
    fn fits(&self, first: usize, count: usize) -> bool {
        first
            .checked_add(count)
            .is_some_and(|end| end <= self.config.geometry.slots())
    }

    fn first_occupied(&self, first: usize, count: usize) -> Option<usize> {
        (first..first + count).find(|&slot| !self.is_free(slot))
    }

    /// Make sure that all tables leading to `slot` exist and belong to this directory
    fn ensure(&mut self, slot: usize) -> Result<*mut PageTableEntry, MmuError> {
        let geometry = self.config.geometry;
        let mut table = self.root;
        for level in (2..geometry.levels).rev() {
            let entry = unsafe { &mut self.table(table).entries[geometry.slot_index(slot, level)] };
            if entry.is_leaf() {
                return Err(MmuError::SlotConflict {
                    addr: geometry.slot_addr(slot),
                });
            }
            if !entry.is_valid() {
                let child = self.frames.calloc(1).ok_or(MmuError::Exhausted { frames: 1 })?;
                log::trace!("allocated level {} table {child:#x}", level - 1);
                unsafe { entry.set_table(child, OWNED) };
            } else if self.owns_root && !entry.get_flags().contains(OWNED) {
                let shared = entry.addr();
                let child = self.frames.calloc(1).ok_or(MmuError::Exhausted { frames: 1 })?;
                unsafe {
                    copy_shared(self.table(shared), self.table(child));
                    entry.set_table(child, OWNED);
                }
                log::debug!("replaced shared level {} table {shared:#x} with private copy {child:#x}", level - 1);
            }
            table = entry.addr();
        }
        Ok(unsafe { &mut self.table(table).entries[geometry.slot_index(slot, 1)] as *mut _ })
    }

    /// Point `pts` slots starting at `first` to the tables at `pt`.
    ///
    /// Either all slots are claimed or none.
    fn claim(&mut self, first: usize, pt: PAddr, pts: usize) -> Result<(), MmuError> {
        for i in 0..pts {
            match self.ensure(first + i) {
                Ok(entry) => unsafe {
                    (*entry).set_table(pt + i as u64 * PAGE, EntryFlags::empty())
                },
                Err(e) => {
                    self.release(first, i);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Replace shared tables on the way to `count` slots starting at `first` with private copies
    fn privatize(&mut self, first: usize, count: usize) -> Result<(), MmuError> {
        if !self.owns_root {
            return Ok(());
        }
        for slot in first..first + count {
            self.ensure(slot)?;
        }
        Ok(())
    }

    fn release(&mut self, first: usize, count: usize) {
        for slot in first..first + count {
            if let Slot::Entry(entry) = self.lookup(slot) {
                unsafe { (*entry).clear() };
            }
        }
        self.flush_tlb();
    }

    /// Whether the slots starting at `first` hold exactly the tables of `chunk`
    fn holds(&self, first: usize, chunk: &Chunk<'_, A>) -> bool {
        if !self.fits(first, chunk.pts()) {
            return false;
        }
        (0..chunk.pts()).all(|i| match self.lookup(first + i) {
            Slot::Entry(entry) => {
                let entry = unsafe { &*entry };
                entry.is_table() && entry.addr() == chunk.pt() + i as u64 * PAGE
            }
            _ => false,
        })
    }

    /// Search the hierarchy below `table` (at `level`) for the slot that points to the leaf table `pt`
    fn find(&self, table: PAddr, level: usize, base: usize, pt: PAddr) -> Option<usize> {
        let shift = (level - 1) * self.config.geometry.index_bits as usize;
        let table = unsafe { self.table(table) };
        for (i, entry) in table.valid_entries() {
            if !entry.is_table() {
                continue;
            }
            let slot = base + (i << shift);
            if level == 1 {
                if entry.addr() == pt {
                    return Some(slot);
                }
            } else if let Some(slot) = self.find(entry.addr(), level - 1, slot, pt) {
                return Some(slot);
            }
        }
        None
    }

    /// Attach `chunk` at the first free run of slots above the application base address.
    ///
    /// Returns the virtual address at which the chunk starts.
    ///
    /// # Safety
    /// The directory refers to the leaf tables of `chunk` without borrowing it.
    /// `chunk` must be detached again before it is dropped, unless the directory is never used after that.
    pub unsafe fn attach(&mut self, chunk: &Chunk<'_, A>) -> Result<VAddr, MmuError> {
        self.attach_from(chunk, self.config.first_app_slot())
    }

    /// Attach `chunk` at the first free run of slots starting at `from` or above
    ///
    /// # Safety
    /// See [`attach()`](Directory::attach).
    pub unsafe fn attach_from(&mut self, chunk: &Chunk<'_, A>, from: usize) -> Result<VAddr, MmuError> {
        let geometry = self.config.geometry;
        let pts = chunk.pts();
        let mut slot = from;
        while self.fits(slot, pts) {
            match self.first_occupied(slot, pts) {
                Some(busy) => slot = busy + 1,
                None => {
                    self.claim(slot, chunk.pt(), pts)?;
                    let addr = geometry.slot_addr(slot);
                    log::debug!("attached chunk {:#x} at {addr:#x}", chunk.pt());
                    return Ok(addr);
                }
            }
        }
        log::debug!("no run of {pts} free slots for chunk {:#x}", chunk.pt());
        Err(MmuError::NoFreeSlot)
    }

    /// Attach `chunk` at the slot containing `addr`.
    ///
    /// Fails without modifying anything if any of the required slots is occupied.
    ///
    /// # Safety
    /// See [`attach()`](Directory::attach).
    pub unsafe fn attach_at(&mut self, chunk: &Chunk<'_, A>, addr: VAddr) -> Result<VAddr, MmuError> {
        let geometry = self.config.geometry;
        let slot = geometry.slot_of(addr);
        let base = geometry.slot_addr(slot);
        if !self.fits(slot, chunk.pts()) || self.first_occupied(slot, chunk.pts()).is_some() {
            log::debug!("cannot attach chunk {:#x} at {base:#x}: slots are occupied", chunk.pt());
            return Err(MmuError::SlotConflict { addr: base });
        }
        self.claim(slot, chunk.pt(), chunk.pts())?;
        log::debug!("attached chunk {:#x} at {base:#x}", chunk.pt());
        Ok(base)
    }

    /// Remove `chunk` from wherever it is attached.
    ///
    /// The chunk itself is left untouched.
    /// A chunk that is visible through tables shared with the master directory is only removed from this address
    /// space; the shared tables are privately copied first.
    pub fn detach(&mut self, chunk: &Chunk<'_, A>) -> Result<(), MmuError> {
        let geometry = self.config.geometry;
        match self.find(self.root, geometry.levels - 1, 0, chunk.pt()) {
            Some(slot) if self.holds(slot, chunk) => {
                self.privatize(slot, chunk.pts())?;
                self.release(slot, chunk.pts());
                log::debug!("detached chunk {:#x} from {:#x}", chunk.pt(), geometry.slot_addr(slot));
                Ok(())
            }
            found => {
                let addr = found.map_or(0, |slot| geometry.slot_addr(slot));
                log::warn!("cannot detach chunk {:#x}: it is not attached", chunk.pt());
                Err(MmuError::DetachMismatch { addr })
            }
        }
    }

    /// Remove `chunk` from the slots at `addr` after checking that it is attached there
    pub fn detach_at(&mut self, chunk: &Chunk<'_, A>, addr: VAddr) -> Result<(), MmuError> {
        let slot = self.config.geometry.slot_of(addr);
        if !self.holds(slot, chunk) {
            log::warn!("cannot detach chunk {:#x} from {addr:#x}: it is not attached there", chunk.pt());
            return Err(MmuError::DetachMismatch { addr });
        }
        self.privatize(slot, chunk.pts())?;
        self.release(slot, chunk.pts());
        log::debug!("detached chunk {:#x} from {addr:#x}", chunk.pt());
        Ok(())
    }

    /// Translate `addr` by walking the hierarchy in software
    pub fn physical(&self, addr: VAddr) -> Result<PAddr, MmuError> {
        let geometry = self.config.geometry;
        if !vaddr_is_canonical(addr, geometry.vaddr_bits) {
            return Err(MmuError::NotMapped { addr });
        }

        let mut table = self.root;
        for level in (0..geometry.levels).rev() {
            let entry = unsafe { &self.table(table).entries[geometry.table_index(addr, level)] };
            if !entry.is_valid() {
                break;
            }
            if entry.is_leaf() {
                let span = geometry.level_span(level);
                return Ok((entry.addr() & !(span - 1)) | (addr & (span - 1)));
            }
            if level == 0 {
                break;
            }
            table = entry.addr();
        }
        Err(MmuError::NotMapped { addr })
    }

    /// Install this address space on the current hart
    ///
    /// # Safety
    /// All code and data that is in use while switching, including the stack, must be mapped identically in this
    /// address space.
    pub unsafe fn activate(&self) {
        log::debug!("activating address space {:#x}", self.root);
        Satp::write(SatpData {
            mode: self.config.geometry.satp_mode,
            asid: 0,
            ppn: paddr_ppn(self.root),
        });
    }

    pub fn flush_tlb(&self) {}

    pub fn flush_tlb_addr(&self, _addr: VAddr) {}

    /// Free the tables referenced from `table` (at `level`) that carry the [`OWNED`] bit
    fn release_tables(&self, table: PAddr, level: usize) {
        if level < 2 {
            return;
        }
        let table = unsafe { self.table(table) };
        for (_, entry) in table.valid_entries() {
            if entry.is_table() && entry.get_flags().contains(OWNED) {
                self.release_tables(entry.addr(), level - 1);
                unsafe { self.frames.free(entry.addr(), 1) };
            }
        }
    }
}

/// Copy every valid entry of `src` into `dst` without the [`OWNED`] bit
fn copy_shared(src: &PageTable, dst: &mut PageTable) {
    for (i, entry) in src.valid_entries() {
        unsafe {
            dst.entries[i].write(PageTableEntry::from_raw(entry.raw() & !OWNED.bits()));
        }
    }
}

impl<A: FrameAlloc> Debug for Directory<'_, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Directory")
            .field("root", &format_args!("{:#x}", self.root))
            .field("owns_root", &self.owns_root)
            .field("geometry", &self.config.geometry)
            .finish()
    }
}

impl<A: FrameAlloc> Drop for Directory<'_, A> {
    fn drop(&mut self) {
        if !self.owns_root {
            return;
        }
        log::debug!("tearing down address space {:#x}", self.root);
        self.release_tables(self.root, self.config.geometry.levels - 1);
        unsafe { self.frames.free(self.root, 1) };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Geometry;
    use crate::flags::Flags;
    use crate::frames::SearchStrategy;
    use crate::test_utils::{master_directory, TestMemory};
    use riscv::cpu::SatpMode;

    const SV39: MmuConfig = MmuConfig::SIFIVE_U;

    #[test]
    fn test_two_chunks_resolve_to_their_frames() {
        let mem = TestMemory::new(32);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let a = Chunk::new(&frames, PAGESIZE, Flags::APP).unwrap();
        let b = Chunk::new(&frames, PAGESIZE, Flags::APP).unwrap();

        let base_a = unsafe { dir.attach(&a) }.unwrap();
        let base_b = unsafe { dir.attach(&b) }.unwrap();
        assert_eq!(base_a, 0x8040_0000);
        assert_eq!(base_b, 0x8060_0000);
        assert_eq!(dir.physical(base_a + 0x123), Ok(a.phy_address() + 0x123));
        assert_eq!(dir.physical(base_b + 0xff8), Ok(b.phy_address() + 0xff8));
        assert_eq!(
            dir.physical(base_a + PAGE),
            Err(MmuError::NotMapped { addr: base_a + PAGE })
        );
    }

    #[test]
    fn test_attach_detach_restores_mappings() {
        let mem = TestMemory::new(32);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let chunk = Chunk::new(&frames, 3 * PAGESIZE, Flags::SYS).unwrap();

        let base = unsafe { dir.attach(&chunk) }.unwrap();
        assert!(dir.physical(base + 2 * PAGE).is_ok());
        dir.detach(&chunk).unwrap();
        for page in 0..3 {
            assert!(dir.physical(base + page * PAGE).is_err());
        }
        assert_eq!(
            dir.detach(&chunk),
            Err(MmuError::DetachMismatch { addr: 0 })
        );

        // the same slot is handed out again
        assert_eq!(unsafe { dir.attach(&chunk) }, Ok(base));
        dir.detach_at(&chunk, base).unwrap();
        assert!(dir.physical(base).is_err());
    }

    #[test]
    fn test_detach_at_wrong_address_changes_nothing() {
        let mem = TestMemory::new(32);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let a = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        let b = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        let base_a = unsafe { dir.attach(&a) }.unwrap();
        let base_b = unsafe { dir.attach(&b) }.unwrap();

        assert_eq!(
            dir.detach_at(&a, base_b),
            Err(MmuError::DetachMismatch { addr: base_b })
        );
        assert_eq!(dir.physical(base_a), Ok(a.phy_address()));
        assert_eq!(dir.physical(base_b), Ok(b.phy_address()));
    }

    #[test]
    fn test_attach_never_overwrites() {
        let mem = TestMemory::new(32);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let a = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        let b = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        let base_a = unsafe { dir.attach(&a) }.unwrap();

        assert_eq!(
            unsafe { dir.attach_at(&b, base_a + 0x1234) },
            Err(MmuError::SlotConflict { addr: base_a })
        );
        assert_eq!(dir.physical(base_a), Ok(a.phy_address()));
    }

    #[test]
    fn test_partial_overlap_is_rejected() {
        let mem = TestMemory::new(8);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let a = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        let b = Chunk::from_phys(&frames, 0x1000_0000, 513 * PAGESIZE, Flags::IO).unwrap();
        let base_a = unsafe { dir.attach(&a) }.unwrap();

        let below = base_a - 0x20_0000;
        assert_eq!(
            unsafe { dir.attach_at(&b, below) },
            Err(MmuError::SlotConflict { addr: below })
        );
        assert!(dir.physical(below).is_err());
        assert_eq!(dir.physical(base_a), Ok(a.phy_address()));

        // first fit skips past the occupied slot
        let from = SV39.geometry.slot_of(below);
        assert_eq!(unsafe { dir.attach_from(&b, from) }, Ok(base_a + 0x20_0000));
    }

    #[test]
    fn test_chunk_spills_into_next_intermediate_table() {
        let mem = TestMemory::new(8);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let chunk = Chunk::from_phys(&frames, 0x1_0000_0000, 513 * PAGESIZE, Flags::IO).unwrap();
        let before = frames.free_frames();

        assert_eq!(unsafe { dir.attach_at(&chunk, 0x3FE0_0000) }, Ok(0x3FE0_0000));
        // one intermediate table on each side of the boundary
        assert_eq!(frames.free_frames(), before - 2);
        assert_eq!(dir.physical(0x3FE0_0000), Ok(0x1_0000_0000));
        assert_eq!(dir.physical(0x4000_0010), Ok(0x1_0020_0010));
        assert!(dir.physical(0x4000_1000).is_err());

        dir.detach(&chunk).unwrap();
        assert!(dir.physical(0x3FE0_0000).is_err());
        assert!(dir.physical(0x4000_0000).is_err());
    }

    #[test]
    fn test_spill_into_occupied_table_is_rejected() {
        let mem = TestMemory::new(8);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let small = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        let large = Chunk::from_phys(&frames, 0x1_0000_0000, 513 * PAGESIZE, Flags::IO).unwrap();
        unsafe { dir.attach_at(&small, 0x4000_0000).unwrap() };

        assert_eq!(
            unsafe { dir.attach_at(&large, 0x3FE0_0000) },
            Err(MmuError::SlotConflict { addr: 0x3FE0_0000 })
        );
        assert!(dir.physical(0x3FE0_0000).is_err());
        assert_eq!(dir.physical(0x4000_0000), Ok(small.phy_address()));
        assert_eq!(unsafe { dir.attach_from(&large, 511) }, Ok(0x4020_0000));
    }

    #[test]
    fn test_failed_claim_leaves_no_slot_behind() {
        let mem = TestMemory::new(4);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let chunk = Chunk::from_phys(&frames, 0x1_0000_0000, 513 * PAGESIZE, Flags::IO).unwrap();
        assert_eq!(frames.free_frames(), 1);

        assert_eq!(
            unsafe { dir.attach_at(&chunk, 0x3FE0_0000) },
            Err(MmuError::Exhausted { frames: 1 })
        );
        assert!(dir.physical(0x3FE0_0000).is_err());
        assert!(dir.detach(&chunk).is_err());
    }

    #[test]
    fn test_huge_leaves_translate_and_block_slots() {
        let mem = TestMemory::new(8);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        unsafe { dir.table(dir.pd()).entries[2].set_leaf(0x8000_0000, EntryFlags::RWX) };

        assert_eq!(dir.physical(0x8012_3456), Ok(0x8012_3456));
        let chunk = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        assert_eq!(
            unsafe { dir.attach(&chunk) },
            Ok(0xC000_0000),
            "slots below a huge leaf must be skipped"
        );
        assert_eq!(
            unsafe { dir.attach_at(&chunk, 0x8040_0000) },
            Err(MmuError::SlotConflict { addr: 0x8040_0000 })
        );
    }

    #[test]
    fn test_private_directory_leaves_master_untouched() {
        let mem = TestMemory::new(32);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut master = master_directory(&frames, SV39);
        let kernel = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        let kernel_base = unsafe { master.attach(&kernel) }.unwrap();
        let user = Chunk::new(&frames, PAGESIZE, Flags::APP).unwrap();
        let before = frames.free_frames();

        let mut private = Directory::new(&frames, &master).unwrap();
        assert!(private.owns_root());
        assert_eq!(private.physical(kernel_base), Ok(kernel.phy_address()));

        let user_base = unsafe { private.attach(&user) }.unwrap();
        assert_eq!(user_base, kernel_base + 0x20_0000);
        assert_eq!(private.physical(user_base), Ok(user.phy_address()));
        assert!(master.physical(user_base).is_err());
        assert_eq!(master.physical(kernel_base), Ok(kernel.phy_address()));

        // root and the private copy of the shared intermediate table
        assert_eq!(frames.free_frames(), before - 2);
        drop(private);
        assert_eq!(frames.free_frames(), before);
        assert_eq!(master.physical(kernel_base), Ok(kernel.phy_address()));
    }

    #[test]
    fn test_dropping_directory_frees_its_tables() {
        let mem = TestMemory::new(32);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let master = master_directory(&frames, SV39);
        let before = frames.free_frames();

        let chunk = Chunk::new(&frames, PAGESIZE, Flags::APP).unwrap();
        let mut dir = Directory::new(&frames, &master).unwrap();
        unsafe { dir.attach(&chunk).unwrap() };
        unsafe { dir.attach_at(&chunk, 0x3FE0_0000).unwrap() };
        drop(dir);
        assert_eq!(frames.free_frames(), before - 2);
        drop(chunk);
        assert_eq!(frames.free_frames(), before);
    }

    #[test]
    fn test_activate_installs_root() {
        let mem = TestMemory::new(8);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let master = master_directory(&frames, SV39);
        let dir = Directory::new(&frames, &master).unwrap();

        unsafe { dir.activate() };
        assert_eq!(Satp::read_raw(), (8 << 60) | (dir.pd() >> 12));

        let before = frames.free_frames();
        let current = unsafe { Directory::current(&frames, SV39) };
        assert_eq!(current.pd(), dir.pd());
        assert!(!current.owns_root());
        drop(current);
        assert_eq!(frames.free_frames(), before);
    }

    #[test]
    fn test_four_level_geometry() {
        let config = MmuConfig {
            geometry: Geometry::SV48,
            ..SV39
        };
        let mem = TestMemory::new(16);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let master = master_directory(&frames, config);
        let mut dir = Directory::new(&frames, &master).unwrap();
        let chunk = Chunk::new(&frames, 2 * PAGESIZE, Flags::APP).unwrap();
        let before = frames.free_frames();

        let base = unsafe { dir.attach(&chunk) }.unwrap();
        assert_eq!(base, 0x8040_0000);
        assert_eq!(frames.free_frames(), before - 2);
        assert_eq!(dir.physical(base + PAGE + 7), Ok(chunk.phy_address() + PAGE + 7));
        assert_eq!(dir.config().geometry.satp_mode, SatpMode::Sv48);

        dir.detach(&chunk).unwrap();
        drop(dir);
        assert_eq!(frames.free_frames(), before + 1);
    }

    #[test]
    fn test_no_free_slot() {
        let mem = TestMemory::new(8);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let chunk = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        let last = SV39.geometry.slots() - 1;

        assert_eq!(unsafe { dir.attach_from(&chunk, last + 1) }, Err(MmuError::NoFreeSlot));
        assert_eq!(unsafe { dir.attach_from(&chunk, last) }, Ok(0xFFFF_FFFF_FFE0_0000));
        assert_eq!(dir.physical(0xFFFF_FFFF_FFE0_0000), Ok(chunk.phy_address()));
    }

    #[test]
    fn test_private_detach_keeps_master_mapping() {
        let mem = TestMemory::new(32);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut master = master_directory(&frames, SV39);
        let kernel = Chunk::new(&frames, PAGESIZE, Flags::SYS).unwrap();
        let kernel_base = unsafe { master.attach(&kernel) }.unwrap();
        let before = frames.free_frames();

        let mut private = Directory::new(&frames, &master).unwrap();
        assert_eq!(private.detach(&kernel), Ok(()));
        assert!(private.physical(kernel_base).is_err());
        assert_eq!(master.physical(kernel_base), Ok(kernel.phy_address()));
        // root and the private copy of the shared intermediate table
        assert_eq!(frames.free_frames(), before - 2);

        let mut other = Directory::new(&frames, &master).unwrap();
        assert_eq!(other.physical(kernel_base), Ok(kernel.phy_address()));
        assert_eq!(other.detach_at(&kernel, kernel_base), Ok(()));
        assert_eq!(master.physical(kernel_base), Ok(kernel.phy_address()));

        drop(other);
        drop(private);
        assert_eq!(frames.free_frames(), before);
    }

    #[test]
    fn test_detached_chunk_can_be_dropped_and_replaced() {
        let mem = TestMemory::new(32);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let master = master_directory(&frames, SV39);
        let before = frames.free_frames();
        let mut dir = Directory::new(&frames, &master).unwrap();

        let first = Chunk::new(&frames, 2 * PAGESIZE, Flags::APP).unwrap();
        let base = unsafe { dir.attach(&first) }.unwrap();
        dir.detach(&first).unwrap();
        drop(first);
        assert!(dir.physical(base).is_err());

        let second = Chunk::new(&frames, PAGESIZE, Flags::APP).unwrap();
        assert_eq!(unsafe { dir.attach(&second) }, Ok(base));
        assert_eq!(dir.physical(base + 0x42), Ok(second.phy_address() + 0x42));
        dir.detach(&second).unwrap();
        drop(second);
        drop(dir);
        assert_eq!(frames.free_frames(), before);
    }

    #[test]
    fn test_slot_runs_past_the_end_are_rejected() {
        let mem = TestMemory::new(8);
        let frames = mem.allocator(SearchStrategy::FirstFit);
        let mut dir = master_directory(&frames, SV39);
        let chunk = Chunk::from_phys(&frames, 0x1_0000_0000, 513 * PAGESIZE, Flags::IO).unwrap();

        assert_eq!(unsafe { dir.attach_from(&chunk, usize::MAX) }, Err(MmuError::NoFreeSlot));
        assert_eq!(
            unsafe { dir.attach_from(&chunk, usize::MAX - 1) },
            Err(MmuError::NoFreeSlot)
        );
        assert_eq!(
            unsafe { dir.attach_at(&chunk, 0xFFFF_FFFF_FFE0_0000) },
            Err(MmuError::SlotConflict { addr: 0xFFFF_FFFF_FFE0_0000 })
        );
        assert!(dir.physical(0xFFFF_FFFF_FFE0_0000).is_err());
    }
}
