//! Allocation of physical page frames
//!
//! Free frames are tracked in an address ordered list of runs whose nodes are stored inside the first frame of
//! each run, so no memory besides the free frames themselves is needed for bookkeeping.
//! Adjacent runs are merged whenever a run is freed which means that no two nodes of the list are ever
//! physically adjacent.
//!
//! ```text
//!  head ──► ┌──────────────────┐        ┌──────────────────┐
//!           │ base │ n │ next ─┼──────► │ base │ n │ next ─┼──► 0
//!           ├──────┴───┴───────┤        ├──────┴───┴───────┤
//!           │ free frames ...  │        │ free frames ...  │
//!           └──────────────────┘        └──────────────────┘
//! ```

use core::mem;
use ksync::SpinLock;
use riscv::mem::{PAddr, PAGESIZE, PAGE_OFFSET_MASK};
use riscv::PhysMapper;
use static_assertions::const_assert;

const FRAME_SIZE: u64 = PAGESIZE as u64;

/// The node describing one run of free frames.
///
/// It is written into the first bytes of the run that it describes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
struct FreeRun {
    base: PAddr,
    frames: usize,
    /// Physical address of the next run or 0 if this is the last one
    next: PAddr,
}

const_assert!(mem::size_of::<FreeRun>() <= PAGESIZE);

/// How a run is chosen to serve an allocation request
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum SearchStrategy {
    /// Use the lowest addressed run that is large enough
    #[default]
    FirstFit,
    /// Use the smallest run that is large enough
    BestFit,
}

/// A source of physical page frames.
///
/// Chunks and directories are generic over this so that they can draw frames from any allocator that also knows
/// how to make the frames accessible.
pub trait FrameAlloc {
    type Mapper: PhysMapper;

    /// The translation through which frames handed out by this allocator are loadable
    fn mapper(&self) -> &Self::Mapper;

    /// Allocate `frames` physically contiguous frames and return the physical address of the first one
    fn alloc(&self, frames: usize) -> Option<PAddr>;

    /// Like [`alloc()`](FrameAlloc::alloc) but the frames are filled with zeros
    fn calloc(&self, frames: usize) -> Option<PAddr> {
        let addr = self.alloc(frames)?;
        unsafe {
            self.mapper()
                .phys_to_mapped_mut(addr as *mut u8)
                .write_bytes(0, frames * PAGESIZE);
        }
        Some(addr)
    }

    /// Return `frames` frames starting at `addr` to the allocator.
    ///
    /// # Safety
    /// The frames must not be in use anymore and must be backed by memory that is accessible through
    /// [`mapper()`](FrameAlloc::mapper).
    unsafe fn free(&self, addr: PAddr, frames: usize);

    /// The size (in frames) of the largest run that can currently be allocated
    fn allocable(&self) -> usize;
}

/// The frame allocator.
///
/// All list operations happen behind a [`SpinLock`] so the allocator can be shared by reference between harts
/// and interrupt handlers.
pub struct FrameAllocator<M: PhysMapper> {
    mapper: M,
    strategy: SearchStrategy,
    head: SpinLock<PAddr>,
}

impl<M: PhysMapper> FrameAllocator<M> {
    /// Create an allocator that does not yet know about any free frames.
    ///
    /// Memory is handed to it with [`free()`](FrameAlloc::free).
    pub const fn new(mapper: M, strategy: SearchStrategy) -> Self {
        Self {
            mapper,
            strategy,
            head: SpinLock::new(0),
        }
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    unsafe fn read(&self, addr: PAddr) -> FreeRun {
        self.mapper
            .phys_to_mapped(addr as *const FreeRun)
            .read_volatile()
    }

    unsafe fn write(&self, run: FreeRun) {
        self.mapper
            .phys_to_mapped_mut(run.base as *mut FreeRun)
            .write_volatile(run)
    }

    unsafe fn set_next(&self, head: &mut PAddr, prev: PAddr, next: PAddr) {
        if prev == 0 {
            *head = next;
        } else {
            let mut run = self.read(prev);
            run.next = next;
            self.write(run);
        }
    }

    /// Allocate `frames` contiguous frames while searching with the given strategy instead of the default one.
    ///
    /// The frames are taken from the end of the chosen run so that its node stays where it is.
    pub fn alloc_with(&self, frames: usize, strategy: SearchStrategy) -> Option<PAddr> {
        if frames == 0 {
            return None;
        }

        let mut head = self.head.spin_lock();
        let mut chosen: Option<(PAddr, FreeRun)> = None;
        let mut prev = 0;
        let mut cur = *head;
        while cur != 0 {
            let run = unsafe { self.read(cur) };
            if run.frames >= frames {
                match strategy {
                    SearchStrategy::FirstFit => {
                        chosen = Some((prev, run));
                        break;
                    }
                    SearchStrategy::BestFit => {
                        if chosen.map_or(true, |(_, best)| run.frames < best.frames) {
                            chosen = Some((prev, run));
                        }
                        if run.frames == frames {
                            break;
                        }
                    }
                }
            }
            prev = cur;
            cur = run.next;
        }

        let Some((prev, mut run)) = chosen else {
            log::trace!("no free run of {frames} frames is available");
            return None;
        };

        run.frames -= frames;
        unsafe {
            if run.frames == 0 {
                self.set_next(&mut head, prev, run.next);
            } else {
                self.write(run);
            }
        }

        let addr = run.base + run.frames as u64 * FRAME_SIZE;
        log::trace!("allocated {frames} frames at {addr:#x}");
        Some(addr)
    }

    /// The total number of free frames
    pub fn free_frames(&self) -> usize {
        let mut total = 0;
        self.for_each_run(|_, frames| total += frames);
        total
    }

    /// Call `f` with the base address and size of every free run in address order
    pub fn for_each_run(&self, mut f: impl FnMut(PAddr, usize)) {
        let head = self.head.spin_lock();
        let mut cur = *head;
        while cur != 0 {
            let run = unsafe { self.read(cur) };
            if run.base != cur {
                log::error!("free run node at {cur:#x} claims to describe {:#x}", run.base);
            }
            f(cur, run.frames);
            cur = run.next;
        }
    }
}

impl<M: PhysMapper> FrameAlloc for FrameAllocator<M> {
    type Mapper = M;

    fn mapper(&self) -> &Self::Mapper {
        &self.mapper
    }

    fn alloc(&self, frames: usize) -> Option<PAddr> {
        self.alloc_with(frames, self.strategy)
    }

    unsafe fn free(&self, addr: PAddr, frames: usize) {
        if addr == 0 || frames == 0 {
            return;
        }
        if addr & PAGE_OFFSET_MASK != 0 {
            log::warn!("ignoring free of {frames} frames at unaligned address {addr:#x}");
            return;
        }
        let end = addr + frames as u64 * FRAME_SIZE;

        let mut head = self.head.spin_lock();
        let mut prev = 0;
        let mut prev_run = None;
        let mut cur = *head;
        while cur != 0 && cur < addr {
            let run = self.read(cur);
            prev = cur;
            prev_run = Some(run);
            cur = run.next;
        }
        let next_run = if cur != 0 { Some(self.read(cur)) } else { None };

        // refuse runs that overlap with free memory, the list would be corrupted otherwise
        if let Some(run) = prev_run {
            if run.base + run.frames as u64 * FRAME_SIZE > addr {
                log::error!(
                    "refusing to free {frames} frames at {addr:#x} which overlap the free run at {:#x}",
                    run.base
                );
                return;
            }
        }
        if let Some(run) = next_run {
            if run.base < end {
                log::error!(
                    "refusing to free {frames} frames at {addr:#x} which overlap the free run at {:#x}",
                    run.base
                );
                return;
            }
        }

        let merge_prev = prev_run.filter(|run| run.base + run.frames as u64 * FRAME_SIZE == addr);
        let merge_next = next_run.filter(|run| run.base == end);
        match (merge_prev, merge_next) {
            (Some(mut before), Some(after)) => {
                before.frames += frames + after.frames;
                before.next = after.next;
                self.write(before);
            }
            (Some(mut before), None) => {
                before.frames += frames;
                self.write(before);
            }
            (None, Some(after)) => {
                self.write(FreeRun {
                    base: addr,
                    frames: frames + after.frames,
                    next: after.next,
                });
                self.set_next(&mut head, prev, addr);
            }
            (None, None) => {
                self.write(FreeRun {
                    base: addr,
                    frames,
                    next: cur,
                });
                self.set_next(&mut head, prev, addr);
            }
        }
        log::trace!("freed {frames} frames at {addr:#x}");
    }

    fn allocable(&self) -> usize {
        let mut largest = 0;
        self.for_each_run(|_, frames| largest = largest.max(frames));
        largest
    }
}
