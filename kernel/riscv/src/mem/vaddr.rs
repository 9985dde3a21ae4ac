/// Type alias for virtual addresses.
///
/// This is used by functions that explicitly interpret addresses as virtual ones.
pub type VAddr = u64;

/// Number of implemented virtual address bits in Sv39
pub const SV39_VADDR_BITS: u32 = 39;

/// Make `vaddr` canonical for an address space that implements `bits` virtual address bits.
///
/// All bits above the most-significant implemented bit are set to its value, so an address with bit 38 set becomes
/// `0xFFFFFF8000000000 | vaddr` in Sv39 while an address with bit 38 clear has all upper bits cleared.
#[inline]
pub fn vaddr_canonicalize(vaddr: VAddr, bits: u32) -> VAddr {
    debug_assert!(bits > 0 && bits <= 64);
    let unused = 64 - bits;
    (((vaddr << unused) as i64) >> unused) as u64
}

/// Whether `vaddr` already is canonical for an address space with `bits` implemented virtual address bits
#[inline]
pub fn vaddr_is_canonical(vaddr: VAddr, bits: u32) -> bool {
    vaddr_canonicalize(vaddr, bits) == vaddr
}
