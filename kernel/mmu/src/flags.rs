//! Architecture independent access permissions and their Sv39 encoding

use bitflags::bitflags;
use riscv::mem::EntryFlags;

bitflags! {
    /// Access permissions of a [`Chunk`](crate::Chunk) as requested by higher layers
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct Flags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        /// Accessible from user mode
        const USER = 1 << 3;
        /// Present in all address spaces
        const GLOBAL = 1 << 4;
        const UNCACHED = 1 << 5;
        const WRITE_THROUGH = 1 << 6;

        /// Kernel code and data
        const SYS = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
        /// Application code and data
        const APP = Self::SYS.bits() | Self::USER.bits();
        /// Memory mapped devices
        const IO = Self::READ.bits() | Self::WRITE.bits() | Self::UNCACHED.bits();
    }
}

impl Flags {
    /// Decode the permissions that are encoded in a leaf entry
    pub fn from_entry(entry: EntryFlags) -> Self {
        let mut flags = Flags::empty();
        flags.set(Flags::READ, entry.contains(EntryFlags::Read));
        flags.set(Flags::WRITE, entry.contains(EntryFlags::Write));
        flags.set(Flags::EXEC, entry.contains(EntryFlags::Execute));
        flags.set(Flags::USER, entry.contains(EntryFlags::UserReadable));
        flags.set(Flags::GLOBAL, entry.contains(EntryFlags::Global));
        flags
    }
}

/// Leaf permissions for the given flags.
///
/// Writable pages are always readable since W without R is reserved in Sv39, and a chunk without any of R, W or X is
/// mapped read-only since such an entry would otherwise be interpreted as a pointer to another table.
/// Sv39 has no cache control bits, so `UNCACHED` and `WRITE_THROUGH` are dropped.
impl From<Flags> for EntryFlags {
    fn from(flags: Flags) -> Self {
        let mut entry = EntryFlags::empty();
        entry.set(
            EntryFlags::Read,
            flags.intersects(Flags::READ | Flags::WRITE),
        );
        entry.set(EntryFlags::Write, flags.contains(Flags::WRITE));
        entry.set(EntryFlags::Execute, flags.contains(Flags::EXEC));
        entry.set(EntryFlags::UserReadable, flags.contains(Flags::USER));
        entry.set(EntryFlags::Global, flags.contains(Flags::GLOBAL));
        if !entry.intersects(EntryFlags::RWX) {
            entry |= EntryFlags::Read;
        }
        entry
    }
}
