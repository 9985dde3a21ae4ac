//! Population of runs of leaf page tables
//!
//! A [`Chunk`](crate::Chunk) owns one or more leaf tables that are contiguous in physical memory.
//! They are handled as one flat array of entries so that a page range may cross table boundaries.

use crate::error::MmuError;
use crate::flags::Flags;
use crate::frames::FrameAlloc;
use core::slice;
use riscv::mem::{EntryFlags, PAddr, PageTable, PageTableEntry, PAGESIZE};
use riscv::PhysMapper;

const PAGE: u64 = PAGESIZE as u64;

/// View `tables` contiguous page tables starting at `pt` as one array of entries.
///
/// # Safety
/// The tables must be initialized, loadable through `mapper` and not be accessed by anything else for `'e`.
pub unsafe fn entries_mut<'e, M: PhysMapper>(
    mapper: &M,
    pt: PAddr,
    tables: usize,
) -> &'e mut [PageTableEntry] {
    slice::from_raw_parts_mut(
        mapper.phys_to_mapped_mut(pt as *mut PageTableEntry),
        tables * PageTable::ENTRIES,
    )
}

/// Shared variant of [`entries_mut()`].
///
/// # Safety
/// The tables must be initialized, loadable through `mapper` and not be mutated for `'e`.
pub unsafe fn entries<'e, M: PhysMapper>(
    mapper: &M,
    pt: PAddr,
    tables: usize,
) -> &'e [PageTableEntry] {
    slice::from_raw_parts(
        mapper.phys_to_mapped(pt as *const PageTableEntry),
        tables * PageTable::ENTRIES,
    )
}

/// Back the entries `from..to` with freshly allocated frames.
///
/// One physically contiguous run is preferred.
/// If none is available the entries are backed frame by frame.
/// Should the allocator run dry in between, every frame claimed by this call is returned before the error is
/// reported so that nothing is left half-mapped.
pub fn map<A: FrameAlloc>(
    frames: &A,
    entries: &mut [PageTableEntry],
    from: usize,
    to: usize,
    flags: Flags,
) -> Result<(), MmuError> {
    let count = to - from;
    if let Some(base) = frames.alloc(count) {
        remap(entries, base, from, to, flags);
        return Ok(());
    }

    log::trace!("no contiguous run of {count} frames, mapping frame by frame");
    let leaf_flags = EntryFlags::from(flags);
    for i in from..to {
        match frames.alloc(1) {
            Some(frame) => unsafe { entries[i].set_leaf(frame, leaf_flags) },
            None => {
                unsafe { unmap(frames, entries, from, i) };
                return Err(MmuError::Exhausted { frames: to - i });
            }
        }
    }
    Ok(())
}

/// Point the entries `from..to` at the contiguous physical range starting at `base`.
///
/// The allocator is not involved; `base` may be device memory as well as RAM.
pub fn remap(entries: &mut [PageTableEntry], base: PAddr, from: usize, to: usize, flags: Flags) {
    let leaf_flags = EntryFlags::from(flags);
    for (i, entry) in entries[from..to].iter_mut().enumerate() {
        unsafe { entry.set_leaf(base + i as u64 * PAGE, leaf_flags) };
    }
}

/// Return the frames referenced by the entries `from..to` to the allocator and clear the entries
///
/// # Safety
/// The frames must have been allocated from `frames` and must not be used anymore.
pub unsafe fn unmap<A: FrameAlloc>(
    frames: &A,
    entries: &mut [PageTableEntry],
    from: usize,
    to: usize,
) {
    for entry in entries[from..to].iter_mut() {
        if let Ok(frame) = entry.get_addr() {
            frames.free(frame, 1);
        }
        entry.clear();
    }
}
