/// Type alias for physical addresses.
///
/// This is used by functions that explicitly interpret addresses as physical ones.
pub type PAddr = u64;

pub const PAGE_OFFSET_BITS: u64 = 12;
pub const PAGE_OFFSET_MASK: u64 = (1 << PAGE_OFFSET_BITS) - 1;

const PPN0_BITS: u64 = 9;
const PPN0_MASK: u64 = ((1 << PPN0_BITS) - 1) << (PAGE_OFFSET_BITS);
const PPN1_BITS: u64 = 9;
const PPN1_MASK: u64 = ((1 << PPN1_BITS) - 1) << (PAGE_OFFSET_BITS + PPN0_BITS);
const PPN2_BITS: u64 = 26;
const PPN2_MASK: u64 = ((1 << PPN2_BITS) - 1) << (PAGE_OFFSET_BITS + PPN0_BITS + PPN1_BITS);
const PPN_MASK: u64 = PPN0_MASK | PPN1_MASK | PPN2_MASK;

/// Get the physical page number encoded in a physical address
#[inline]
pub fn paddr_ppn(paddr: PAddr) -> u64 {
    (paddr & PPN_MASK) >> PAGE_OFFSET_BITS
}

/// Construct the physical address at which the given physical page starts
#[inline]
pub fn paddr_from_ppn(ppn: u64) -> PAddr {
    (ppn << PAGE_OFFSET_BITS) & PPN_MASK
}

/// Get the page offset from a physical address
#[inline]
pub fn paddr_page_offset(paddr: PAddr) -> u64 {
    paddr & PAGE_OFFSET_MASK
}

/// Round the physical address down to the start of its page
#[inline]
pub fn paddr_align_down(paddr: PAddr) -> PAddr {
    paddr & !PAGE_OFFSET_MASK
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ppn_round_trip() {
        let paddr = (5 << 30) | (3 << 21) | (7 << 12) | 0x123;
        assert_eq!(paddr_ppn(paddr), (5 << 18) | (3 << 9) | 7);
        assert_eq!(paddr_page_offset(paddr), 0x123);
        assert_eq!(paddr_from_ppn(paddr_ppn(paddr)), paddr_align_down(paddr));
    }

    #[test]
    fn test_ppn_is_limited_to_56_bits() {
        assert_eq!(paddr_from_ppn(u64::MAX), ((1 << 56) - 1) & !PAGE_OFFSET_MASK);
    }
}
