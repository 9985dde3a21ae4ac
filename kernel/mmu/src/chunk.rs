use crate::error::MmuError;
use crate::flags::Flags;
use crate::frames::FrameAlloc;
use crate::page_table;
use core::fmt::{Debug, Formatter};
use riscv::mem::{paddr_align_down, paddr_page_offset, PAddr, PageTable, PageTableEntry, PAGESIZE};

/// An owned span of mapped memory with uniform permissions.
///
/// A chunk consists of one or more leaf page tables that are contiguous in physical memory and whose entries are
/// all populated when construction succeeds.
/// It does not know where it is mapped; that is decided when it is attached to a [`Directory`](crate::Directory).
///
/// When dropped, the frames backing the chunk and its page tables are returned to the allocator.
/// Chunks created with [`from_phys()`](Chunk::from_phys) only return their page tables.
/// A chunk must therefore be detached from every directory it is attached to before it is dropped.
pub struct Chunk<'a, A: FrameAlloc> {
    frames: &'a A,
    pages: usize,
    pts: usize,
    flags: Flags,
    pt: PAddr,
    owns_frames: bool,
}

impl<'a, A: FrameAlloc> Chunk<'a, A> {
    /// Create a chunk of at least `bytes` bytes that is backed by frames from `frames`
    pub fn new(frames: &'a A, bytes: usize, flags: Flags) -> Result<Self, MmuError> {
        Self::build(frames, bytes, flags, None)
    }

    /// Create a chunk that maps the physical range starting at `phy_addr`.
    ///
    /// Used for device memory and identity mappings of RAM.
    /// An unaligned `phy_addr` is rounded down to its page and the chunk grows accordingly.
    pub fn from_phys(
        frames: &'a A,
        phy_addr: PAddr,
        bytes: usize,
        flags: Flags,
    ) -> Result<Self, MmuError> {
        let bytes = bytes + paddr_page_offset(phy_addr) as usize;
        Self::build(frames, bytes, flags, Some(paddr_align_down(phy_addr)))
    }

    fn build(
        frames: &'a A,
        bytes: usize,
        flags: Flags,
        base: Option<PAddr>,
    ) -> Result<Self, MmuError> {
        let pages = bytes.div_ceil(PAGESIZE);
        if pages == 0 {
            return Err(MmuError::EmptyChunk);
        }
        let pts = pages.div_ceil(PageTable::ENTRIES);
        let pt = frames
            .calloc(pts)
            .ok_or(MmuError::Exhausted { frames: pts })?;

        let entries = unsafe { page_table::entries_mut(frames.mapper(), pt, pts) };
        match base {
            Some(base) => page_table::remap(entries, base, 0, pages, flags),
            None => {
                if let Err(e) = page_table::map(frames, entries, 0, pages, flags) {
                    unsafe { frames.free(pt, pts) };
                    return Err(e);
                }
            }
        }

        log::debug!("created chunk of {pages} pages in {pts} page tables at {pt:#x} with flags {flags:?}");
        Ok(Self {
            frames,
            pages,
            pts,
            flags,
            pt,
            owns_frames: base.is_none(),
        })
    }

    /// How many leaf page tables the chunk consists of
    pub fn pts(&self) -> usize {
        self.pts
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Physical address of the first leaf page table
    pub fn pt(&self) -> PAddr {
        self.pt
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.pages * PAGESIZE
    }

    /// Physical address of the frame backing the first page
    pub fn phy_address(&self) -> PAddr {
        self.entries()[0].addr()
    }

    /// Whether the mapped frames are returned to the allocator when the chunk is dropped
    pub fn owns_frames(&self) -> bool {
        self.owns_frames
    }

    /// The entries of all leaf tables of this chunk
    pub fn entries(&self) -> &[PageTableEntry] {
        unsafe { page_table::entries(self.frames.mapper(), self.pt, self.pts) }
    }

    /// Chunks cannot change their size; release and reallocate instead.
    pub fn resize(&mut self, _amount: usize) -> Result<usize, MmuError> {
        Err(MmuError::Unsupported)
    }
}

impl<A: FrameAlloc> Debug for Chunk<'_, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Chunk")
            .field("pt", &format_args!("{:#x}", self.pt))
            .field("pts", &self.pts)
            .field("pages", &self.pages)
            .field("flags", &self.flags)
            .field("owns_frames", &self.owns_frames)
            .finish()
    }
}

impl<A: FrameAlloc> Drop for Chunk<'_, A> {
    fn drop(&mut self) {
        log::debug!("releasing chunk of {} pages at {:#x}", self.pages, self.pt);
        unsafe {
            if self.owns_frames {
                let entries = page_table::entries_mut(self.frames.mapper(), self.pt, self.pts);
                page_table::unmap(self.frames, entries, 0, self.pages);
            }
            self.frames.free(self.pt, self.pts);
        }
    }
}
