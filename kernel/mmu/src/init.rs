//! Bootstrapping of virtual memory management
//!
//! Early boot code hands the free physical ranges and the root table it installed to [`init()`].
//! Everything that is allocated here is required for the kernel to continue so failures are fatal.

use crate::chunk::Chunk;
use crate::config::MmuConfig;
use crate::directory::Directory;
use crate::error::MmuError;
use crate::flags::Flags;
use crate::frames::FrameAlloc;
use core::ops::Range;
use riscv::mem::{PAddr, VAddr, PAGESIZE, PAGE_OFFSET_MASK};

/// Hand the given physical ranges to the frame allocator.
///
/// Partial pages at the start and end of each range are skipped.
///
/// # Safety
/// The ranges must be unused RAM that is accessible through the allocator's mapper.
pub unsafe fn seed<A: FrameAlloc>(frames: &A, ranges: &[Range<PAddr>]) {
    for range in ranges {
        let start = (range.start + PAGE_OFFSET_MASK) & !PAGE_OFFSET_MASK;
        let end = range.end & !PAGE_OFFSET_MASK;
        if start >= end {
            log::debug!("skipping free range {:#x}..{:#x} which holds no full page", range.start, range.end);
            continue;
        }
        let count = ((end - start) / PAGESIZE as u64) as usize;
        log::debug!("adding {count} frames at {start:#x} to the frame allocator");
        frames.free(start, count);
    }
}

/// Seed the allocator and wrap the master directory whose root table is at `master_root`.
///
/// # Safety
/// See [`seed()`] and [`Directory::from_root()`].
pub unsafe fn init<'a, A: FrameAlloc>(
    frames: &'a A,
    ranges: &[Range<PAddr>],
    master_root: PAddr,
    config: MmuConfig,
) -> Directory<'a, A> {
    if let Err(e) = config.validate() {
        panic!("invalid memory management configuration: {e}");
    }
    seed(frames, ranges);
    log::debug!("largest free run holds {} frames", frames.allocable());
    Directory::from_root(frames, master_root, config)
}

/// Create the system heap and attach it to `master`.
///
/// The heap is placed at the fixed system heap address if the memory map has one and first-fit otherwise.
/// Returns the heap chunk and its address.
///
/// # Safety
/// The returned chunk is attached to `master`; see [`Directory::attach()`].
///
/// # Panics
/// The kernel cannot continue without a heap so this panics if the heap cannot be created.
pub unsafe fn init_heap<'a, A: FrameAlloc>(
    frames: &'a A,
    master: &mut Directory<'a, A>,
) -> (Chunk<'a, A>, VAddr) {
    let config = *master.config();
    let heap = match Chunk::new(frames, config.heap_size, Flags::SYS) {
        Ok(heap) => heap,
        Err(e) => panic!("could not allocate the system heap: {e}"),
    };
    let attached = match config.memory.sys_heap {
        Some(addr) => master.attach_at(&heap, addr),
        None => master.attach(&heap),
    };
    match attached {
        Ok(addr) => {
            log::debug!("system heap of {} bytes is at {addr:#x}", heap.size());
            (heap, addr)
        }
        Err(e) => panic!("could not attach the system heap: {e}"),
    }
}

/// Map the physical range `range` at the identical virtual addresses.
///
/// The mapping starts at the beginning of the slot containing `range.start` so that each page keeps its address.
/// The returned chunk never gives its frames to the allocator.
/// An empty or inverted range is rejected with [`MmuError::EmptyChunk`].
///
/// # Safety
/// The returned chunk is attached to `dir`; see [`Directory::attach()`].
pub unsafe fn identity_map<'a, A: FrameAlloc>(
    frames: &'a A,
    dir: &mut Directory<'a, A>,
    range: Range<PAddr>,
    flags: Flags,
) -> Result<(Chunk<'a, A>, VAddr), MmuError> {
    if range.is_empty() {
        return Err(MmuError::EmptyChunk);
    }
    let geometry = dir.config().geometry;
    let base = range.start & !(geometry.level_span(1) - 1);
    let chunk = Chunk::from_phys(frames, base, (range.end - base) as usize, flags)?;
    let addr = dir.attach_at(&chunk, base)?;
    log::debug!("identity mapped {:#x}..{:#x}", range.start, range.end);
    Ok((chunk, addr))
}
