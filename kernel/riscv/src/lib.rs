#![no_std]

#[cfg(test)]
extern crate std;

pub mod cpu;
pub mod mem;

/// Translation between physical addresses (understood by the MMU) and addresses that the CPU can load from right now.
///
/// While paging is disabled, or when the kernel runs at an offset from physical RAM, every access to memory that is
/// named by a physical address (page tables, free frames) has to go through an implementation of this trait.
///
/// # Safety
/// Implementations must be a bijection on the physical range they are used for, i.e.
/// `mapped_to_phys(phys_to_mapped(p)) == p`, and the mapped addresses must actually be backed by the named physical
/// memory.
pub unsafe trait PhysMapper {
    unsafe fn phys_to_mapped_mut<T>(&self, phys: *mut T) -> *mut T;
    unsafe fn phys_to_mapped<T>(&self, phys: *const T) -> *const T;
    unsafe fn mapped_to_phys_mut<T>(&self, mapped: *mut T) -> *mut T;
    unsafe fn mapped_to_phys<T>(&self, mapped: *const T) -> *const T;
}

unsafe impl<M: PhysMapper> PhysMapper for &M {
    unsafe fn phys_to_mapped_mut<T>(&self, phys: *mut T) -> *mut T {
        (**self).phys_to_mapped_mut(phys)
    }

    unsafe fn phys_to_mapped<T>(&self, phys: *const T) -> *const T {
        (**self).phys_to_mapped(phys)
    }

    unsafe fn mapped_to_phys_mut<T>(&self, mapped: *mut T) -> *mut T {
        (**self).mapped_to_phys_mut(mapped)
    }

    unsafe fn mapped_to_phys<T>(&self, mapped: *const T) -> *const T {
        (**self).mapped_to_phys(mapped)
    }
}
