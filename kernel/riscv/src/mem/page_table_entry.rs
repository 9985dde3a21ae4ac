use super::PAGESIZE;
use crate::mem::paddr;
use crate::mem::paddr::PAddr;
use bitflags::bitflags;
use core::fmt::{Binary, Debug, Formatter, LowerHex, UpperHex, Write};

/// An entry of a [`PageTable`](super::PageTable) responsible for mapping virtual to phyiscal adresses.
///
/// # Format
/// The PTE format for Sv39 is shown in the below figure.
/// - Bits 9–0 have the meaning as described by [`EntryFlags`]. Bits 9-8 (RSW) are ignored by the hardware and
///   are used by software for bookkeeping.
/// - Bit 63 is reserved for use by the Svnapot extension and must be zeroed by software.
/// - Bits 62–61 are reserved for use by the Svpbmt extension and must be zeroed by software.
/// - Bits 60–54 are reserved for future standard use and must be zeroed by software.
///
/// ```text
///   63 62  61 60      54 53    28 27    19 18    10 9   8  7   6   5   4   3   2   1   0
/// ┌───┬──────┬──────────┬────────┬────────┬────────┬─────┬───┬───┬───┬───┬───┬───┬───┬───┐
/// │ N │ PBMT │ reserved │ PPN[2] │ PPN[1] │ PPN[0] │ RSW │ D │ A │ G │ U │ X │ W │ R │ V │
/// └───┴──────┴──────────┴────────┴────────┴────────┴─────┴───┴───┴───┴───┴───┴───┴───┴───┘
///       2bit     7bit     26bit     9bit     9bit   2bit
///                      Sv39 Page Table Entry
/// ```
///
/// An entry is either a *leaf* (at least one of R, W or X set) naming the frame that backs a page, or a *table*
/// entry (only V set) naming the next-level [`PageTable`](super::PageTable).
#[derive(Copy, Clone, Eq, PartialEq, Default)]
#[repr(C, align(8))]
pub struct PageTableEntry {
    pub(crate) entry: u64,
}

const FLAG_BITS: u64 = 10;
const FLAG_MASK: u64 = (1 << FLAG_BITS) - 1;
const PPN_OFFSET: u64 = 10;
const PPN_BITS: u64 = 44;
const PPN_MASK: u64 = ((1 << PPN_BITS) - 1) << PPN_OFFSET;

impl PageTableEntry {
    /// An entry that does not point to anything and is considered disabled by the hardware.
    pub const EMPTY: Self = Self { entry: 0 };

    /// Encode a leaf entry pointing to the frame at `addr`.
    ///
    /// `Valid`, `Accessed` and `Dirty` are always added so that the hardware never needs to update the entry.
    pub fn leaf(addr: PAddr, flags: EntryFlags) -> Self {
        Self::encode(
            addr,
            flags | EntryFlags::Valid | EntryFlags::Accessed | EntryFlags::Dirty,
        )
    }

    /// Encode an entry pointing to the next-level page table at `addr`.
    ///
    /// Only software bits from `sw_flags` are kept in addition to `Valid`.
    pub fn table(addr: PAddr, sw_flags: EntryFlags) -> Self {
        Self::encode(addr, (sw_flags & EntryFlags::SOFTWARE) | EntryFlags::Valid)
    }

    /// Reinterpret a raw 64-bit value as an entry
    pub const fn from_raw(entry: u64) -> Self {
        Self { entry }
    }

    /// The raw 64-bit value as it is read by the hardware
    pub const fn raw(&self) -> u64 {
        self.entry
    }

    fn encode(addr: PAddr, flags: EntryFlags) -> Self {
        debug_assert_eq!(
            addr & paddr::PAGE_OFFSET_MASK,
            0,
            "cannot point page table entry to unaligned PAddr {:#x}",
            addr
        );
        Self {
            entry: (((addr >> paddr::PAGE_OFFSET_BITS) << PPN_OFFSET) & PPN_MASK)
                | (flags.bits() & FLAG_MASK),
        }
    }

    /// Whether this entry is currently valid (in other words whether it is considered active)
    pub fn is_valid(&self) -> bool {
        self.get_flags().contains(EntryFlags::Valid)
    }

    /// Whether this is a leaf entry not pointing to further [`PageTable`](super::PageTable)s.
    pub fn is_leaf(&self) -> bool {
        self.is_valid() && self.get_flags().intersects(EntryFlags::RWX)
    }

    /// Whether this entry points to a further [`PageTable`](super::PageTable)
    pub fn is_table(&self) -> bool {
        self.is_valid() && !self.get_flags().intersects(EntryFlags::RWX)
    }

    /// Return the flags which are encoded in this entry
    pub fn get_flags(&self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.entry & FLAG_MASK)
    }

    /// Return the address encoded in this entry regardless of whether it is valid
    pub fn addr(&self) -> PAddr {
        ((self.entry & PPN_MASK) >> PPN_OFFSET) << paddr::PAGE_OFFSET_BITS
    }

    /// Return the address which this entry points to
    pub fn get_addr(&self) -> Result<PAddr, EntryInvalidErr> {
        match self.is_valid() {
            false => Err(EntryInvalidErr),
            true => Ok(self.addr()),
        }
    }

    /// Point this entry to the frame at `addr` as a leaf.
    ///
    /// # Safety
    /// Changing the entry of a PageTable inherently changes virtual address mappings.
    /// This can make other, completely unrelated, references and pointers invalid and must always be done with
    /// care.
    pub unsafe fn set_leaf(&mut self, addr: PAddr, flags: EntryFlags) {
        self.write(Self::leaf(addr, flags));
    }

    /// Point this entry to the next-level page table at `addr`.
    ///
    /// # Safety
    /// See [`set_leaf()`](PageTableEntry::set_leaf).
    pub unsafe fn set_table(&mut self, addr: PAddr, sw_flags: EntryFlags) {
        self.write(Self::table(addr, sw_flags));
    }

    /// Overwrite this entry with another one.
    ///
    /// # Safety
    /// See [`set_leaf()`](PageTableEntry::set_leaf).
    pub unsafe fn write(&mut self, value: PageTableEntry) {
        log::trace!(
            "setting page table entry {:#x}:{} to {:#x} with flags {:?}",
            (self as *mut Self as usize) & !(PAGESIZE - 1),
            ((self as *mut Self as usize) & (PAGESIZE - 1)) / core::mem::size_of::<Self>(),
            value.addr(),
            value.get_flags()
        );
        self.entry = value.entry;
    }

    /// Clear the content of this entry, setting it to 0x0 and removing all flags.
    ///
    /// # Safety
    /// See [`set_leaf()`](PageTableEntry::set_leaf).
    pub unsafe fn clear(&mut self) {
        log::trace!(
            "clearing page table entry {:#x}:{}",
            (self as *mut Self as usize) & !(PAGESIZE - 1),
            ((self as *mut Self as usize) & (PAGESIZE - 1)) / core::mem::size_of::<Self>(),
        );

        self.entry = 0;
    }
}

impl Debug for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self.get_addr() {
            Err(_) => f.write_str("PageTableEntry (invalid) { .. }"),
            Ok(addr) => f.write_fmt(format_args!(
                "PageTableEntry {{ addr: {:#012x}, flags: {:?} }}",
                addr,
                self.get_flags()
            )),
        }
    }
}

impl Binary for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Binary::fmt(&self.entry, f)
    }
}

impl LowerHex for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        LowerHex::fmt(&self.entry, f)
    }
}

impl UpperHex for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        UpperHex::fmt(&self.entry, f)
    }
}

bitflags! {
    /// The flags that can be set on a [`PageTableEntry`]
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct EntryFlags: u64 {
        /// If set, the MMU considers this a valid entry in the page table and uses it for address mapping
        const Valid = 1 << 0;
        /// Allows reading from the mapped page
        const Read = 1 << 1;
        /// Allows writing from the mapped page
        const Write = 1 << 2;
        /// Allows executing code from the mapped page
        const Execute = 1 << 3;
        /// Allows accessing the mapped page **from user mode**
        const UserReadable = 1 << 4;
        /// If set, the MMU considers this entry to be present in **all** address space IDs and caches them accordingly.
        /// It is safe to never set this but when setting it, care should be taken to do it correctly.
        const Global = 1 << 5;
        /// Set by the MMU when something has read from the page since the mapping was set up
        const Accessed = 1 << 6;
        /// Set by the MMU when something has written to the page since the mapping was set up
        const Dirty = 1 << 7;

        /// Custom bit available for use by software
        const CUSTOM1 = 1 << 8;
        /// Custom bit available for use by software
        const CUSTOM2 = 1 << 9;

        const RWX = Self::Read.bits() | Self::Write.bits() | Self::Execute.bits();
        const SOFTWARE = Self::CUSTOM1.bits() | Self::CUSTOM2.bits();
    }
}

impl Debug for EntryFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        fn write_bit(
            flags: EntryFlags,
            bit: EntryFlags,
            c: char,
            f: &mut Formatter<'_>,
        ) -> core::fmt::Result {
            if flags.contains(bit) {
                f.write_char(c)
            } else {
                f.write_char(' ')
            }
        }
        write_bit(*self, EntryFlags::CUSTOM2, '2', f)?;
        write_bit(*self, EntryFlags::CUSTOM1, '1', f)?;
        write_bit(*self, EntryFlags::Dirty, 'D', f)?;
        write_bit(*self, EntryFlags::Accessed, 'A', f)?;
        write_bit(*self, EntryFlags::Global, 'G', f)?;
        write_bit(*self, EntryFlags::UserReadable, 'U', f)?;
        write_bit(*self, EntryFlags::Execute, 'X', f)?;
        write_bit(*self, EntryFlags::Write, 'W', f)?;
        write_bit(*self, EntryFlags::Read, 'R', f)?;
        write_bit(*self, EntryFlags::Valid, 'V', f)?;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EntryInvalidErr;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_address_is_correctly_loaded() {
        let entry = PageTableEntry::from_raw(0x3FFFFFFFFFFC01u64);
        assert_eq!(entry.get_addr().unwrap(), 0x3FFFFFFFFFFC00 << 2);
    }

    #[test]
    fn test_leaf_sets_accessed_and_dirty() {
        let entry = PageTableEntry::leaf(0x80042000, EntryFlags::Read | EntryFlags::Write);
        assert_eq!(entry.raw(), (0x80042000 >> 2) | 0xC7);
        assert!(entry.is_leaf());
        assert_eq!(entry.get_addr(), Ok(0x80042000));
    }

    #[test]
    fn test_table_entry_only_keeps_software_bits() {
        let entry = PageTableEntry::table(0x80043000, EntryFlags::CUSTOM1 | EntryFlags::Read);
        assert_eq!(entry.raw(), (0x80043000 >> 2) | 0x101);
        assert!(entry.is_table());
        assert!(!entry.is_leaf());
        assert!(entry.get_flags().contains(EntryFlags::CUSTOM1));
    }

    #[test]
    fn test_cleared_entry_is_invalid() {
        let mut entry = PageTableEntry::leaf(0x1000, EntryFlags::Read);
        unsafe { entry.clear() };
        assert_eq!(entry, PageTableEntry::EMPTY);
        assert_eq!(entry.get_addr(), Err(EntryInvalidErr));
    }
}
