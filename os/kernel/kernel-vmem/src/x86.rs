//! Bare-metal [`Mmu`] for a 32-bit x86 CPU.

use crate::{Cr0, Cr2, Cr3, Mmu, PhysMapper, VirtMapper};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

/// The real CPU.
///
/// Physical frames are reached by identity: valid while paging is off, and
/// afterwards for frames inside the shared identity-mapped region.
pub struct X86Mmu;

impl PhysMapper for X86Mmu {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let p = pa.as_u32() as usize as *mut T;
        // SAFETY: forwarded contract; identity mapping.
        unsafe { &mut *p }
    }
}

impl VirtMapper for X86Mmu {
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        let p = va.as_u32() as usize as *mut T;
        // SAFETY: forwarded contract.
        unsafe { &mut *p }
    }
}

impl Mmu for X86Mmu {
    fn cr0(&self) -> Cr0 {
        // SAFETY: the kernel runs at CPL0.
        unsafe { Cr0::load_unsafe() }
    }

    unsafe fn set_cr0(&self, cr0: Cr0) {
        unsafe { cr0.store_unsafe() };
    }

    fn cr2(&self) -> Cr2 {
        // SAFETY: the kernel runs at CPL0.
        unsafe { Cr2::load_unsafe() }
    }

    fn cr3(&self) -> Cr3 {
        // SAFETY: the kernel runs at CPL0.
        unsafe { Cr3::load_unsafe() }
    }

    unsafe fn set_cr3(&self, cr3: Cr3) {
        unsafe { cr3.store_unsafe() };
    }

    fn halt(&self) -> ! {
        loop {
            // SAFETY: CPL0; nothing is expected to run after this.
            unsafe { core::arch::asm!("cli; hlt", options(nomem, nostack)) };
        }
    }
}
