//! Handling of the CPU control and status registers involved in address translation
//!
//! The register is modelled as a dummy struct as it is defined in Chapter 4 of the
//! [Risc-V Privileged Specification](https://github.com/riscv/riscv-isa-manual/releases/download/Priv-v1.12/riscv-privileged-20211203.pdf).
//!
//! On targets other than `riscv64` the register is emulated by a plain atomic so that code which activates
//! address spaces can be exercised by host side unit tests.

/// Generate code to read from a specific register.
///
/// # Example:
/// ```ignore
/// let val = read_reg!("satp");
/// let val = read_reg!("satp", u64);
/// ```
#[cfg(target_arch = "riscv64")]
macro_rules! read_reg {
    ($csr:literal,$width:ty) => {{
        let res: $width;
        core::arch::asm!(concat!("csrr {}, ", $csr), out(reg) res);
        res
    }};
    ($csr:literal) => {read_reg!($csr, u64)};
}

#[cfg(not(target_arch = "riscv64"))]
static EMULATED_SATP: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

/// The data that is held by the [`Satp`] register.
///
/// Generally this register holds the physical page number (PPN) of the root page table, i.e., its supervisor physical address divided by 4 KiB;
/// an address space identifier (ASID), which facilitates address-translation fences on a per-address-space basis; and the MODE field, which selects the current address-translation scheme.
///
/// **Warning**: Read the mode variant descriptions carefully as they impose restrictions on valid values for the other fields.
#[derive(Debug, Eq, PartialEq)]
pub struct SatpData {
    pub mode: SatpMode,
    pub asid: u64,
    pub ppn: u64,
}

impl From<u64> for SatpData {
    fn from(value: u64) -> Self {
        SatpData {
            mode: SatpMode::from(value >> 60),   // bits 60-63
            asid: value >> 44 & ((1 << 16) - 1), // bits 44-59
            ppn: value & ((1 << 44) - 1),        // bits 0-43
        }
    }
}

impl From<SatpData> for u64 {
    fn from(value: SatpData) -> Self {
        u64::from(value.mode) << 60
            | (value.asid & ((1 << 16) - 1)) << 44
            | value.ppn & ((1 << 44) - 1)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SatpMode {
    /// No translation or protection
    ///
    /// When MODE=Bare, supervisor virtual addresses are equal to supervisor physical addresses, and there is no additional memory protection beyond the physical memory protection scheme.
    /// **To select MODE=Bare, software must write zero to the remaining fields of satp.**
    Bare,
    /// Page-based 39-bit virtual addressing
    Sv39,
    /// Page-based 48-bit virtual addressing
    Sv48,
    /// Page-based 57-bit virtual addressing
    Sv57,
    /// A mode value that is reserved by the specification
    Reserved(u64),
}

impl From<u64> for SatpMode {
    fn from(value: u64) -> Self {
        match value {
            0 => SatpMode::Bare,
            8 => SatpMode::Sv39,
            9 => SatpMode::Sv48,
            10 => SatpMode::Sv57,
            other => SatpMode::Reserved(other),
        }
    }
}

impl From<SatpMode> for u64 {
    fn from(value: SatpMode) -> Self {
        match value {
            SatpMode::Bare => 0,
            SatpMode::Sv39 => 8,
            SatpMode::Sv48 => 9,
            SatpMode::Sv57 => 10,
            SatpMode::Reserved(other) => other & 0xf,
        }
    }
}

/// Supervisor Address Translation and Protection Register
///
/// The satp register is a read/write register, which controls supervisor-mode address translation and protection.
#[allow(unused)]
pub struct Satp {}

impl Satp {
    #[cfg(target_arch = "riscv64")]
    pub fn read_raw() -> u64 {
        unsafe { read_reg!("satp") }
    }

    #[cfg(not(target_arch = "riscv64"))]
    pub fn read_raw() -> u64 {
        EMULATED_SATP.load(core::sync::atomic::Ordering::SeqCst)
    }

    pub fn read() -> SatpData {
        SatpData::from(Self::read_raw())
    }

    /// Write a raw value into the register after fencing outstanding address translations.
    ///
    /// # Safety
    /// Writing satp changes how every following memory access of this hart is translated.
    /// The code currently executing as well as its stack must be mapped identically in the new address space.
    #[cfg(target_arch = "riscv64")]
    pub unsafe fn write_raw(val: u64) {
        core::arch::asm!("
            sfence.vma
            csrw satp, {}
        ", in(reg) val);
    }

    /// Write a raw value into the emulated register.
    ///
    /// # Safety
    /// Always safe on the emulated register but kept `unsafe` to match the hardware signature.
    #[cfg(not(target_arch = "riscv64"))]
    pub unsafe fn write_raw(val: u64) {
        log::trace!("writing {val:#x} to emulated satp register");
        EMULATED_SATP.store(val, core::sync::atomic::Ordering::SeqCst);
    }

    /// Write a value to the register.
    ///
    /// # Safety
    /// See [`write_raw()`](Satp::write_raw).
    pub unsafe fn write(val: SatpData) {
        Self::write_raw(val.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_satp_data_round_trips_fields() {
        let raw = (8u64 << 60) | (3 << 44) | 0x80042;
        let data = SatpData::from(raw);
        assert_eq!(
            data,
            SatpData {
                mode: SatpMode::Sv39,
                asid: 3,
                ppn: 0x80042,
            }
        );
        assert_eq!(u64::from(data), raw);
    }

    #[test]
    fn test_unknown_mode_is_reserved() {
        assert_eq!(SatpMode::from(5), SatpMode::Reserved(5));
    }
}
