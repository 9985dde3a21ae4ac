use super::{MemoryPage, PageTableEntry, PAGESIZE};
use core::mem;
use static_assertions::{assert_eq_align, assert_eq_size};

/// A PageTable for configuring virtual memory mapping.
///
/// It exactly fills 4096 bytes which is also the size of mapped pages.
/// An all-zero page is a valid, empty table.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [PageTableEntry; PageTable::ENTRIES],
}

assert_eq_size!(PageTable, MemoryPage);
assert_eq_align!(PageTable, MemoryPage);

impl PageTable {
    /// How many entries fit into one table
    pub const ENTRIES: usize = PAGESIZE / mem::size_of::<PageTableEntry>();

    /// Iterate over all valid entries together with their index
    pub fn valid_entries(&self) -> impl Iterator<Item = (usize, &PageTableEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_valid())
    }
}
