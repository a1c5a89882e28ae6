use kernel_memory_addresses::VirtualAddress;

/// CR2 — Page-Fault Linear Address.
///
/// Written by the processor when a page fault is raised and never by
/// software in this kernel.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Cr2(u32);

impl Cr2 {
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn into_bits(self) -> u32 {
        self.0
    }

    /// The virtual address whose access faulted.
    #[must_use]
    pub const fn fault_address(self) -> VirtualAddress {
        VirtualAddress::new(self.0)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr2 {
    unsafe fn load_unsafe() -> Self {
        let mut cr2: u32;
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
        }
        Self(cr2)
    }
}
