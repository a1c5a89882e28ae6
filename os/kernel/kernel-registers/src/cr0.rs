use bitfield_struct::bitfield;

/// Architectural model of CR0 on a 32-bit processor.
///
/// Only the bits the memory manager cares about are named; the rest are
/// carried through untouched so a read-modify-write preserves them.
#[bitfield(u32)]
pub struct Cr0 {
    /// Bit 0 — Protection Enable (PE).
    ///
    /// Must already be set before paging can be turned on.
    pub pe_protection_enable: bool,

    /// Bits 1–15 — Coprocessor and cache-related controls (not modeled).
    #[bits(15)]
    pub other_low: u16,

    /// Bit 16 — Write Protect (WP).
    ///
    /// When set, supervisor code must respect read-only pages.
    pub wp_write_protect: bool,

    /// Bits 17–30 — Alignment and cache controls (not modeled).
    #[bits(14)]
    pub other_high: u16,

    /// Bit 31 — Paging (PG).
    ///
    /// - 0: Linear addresses are physical addresses.
    /// - 1: Linear addresses are translated through the directory in CR3.
    pub pg_paging: bool,
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr0 {
    unsafe fn load_unsafe() -> Self {
        let mut cr0: u32;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr0)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Cr0 {
    unsafe fn store_unsafe(self) {
        let cr0 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_bit_is_bit_31() {
        let cr0 = Cr0::new().with_pg_paging(true);
        assert_eq!(cr0.into_bits(), 0x8000_0000);
    }

    #[test]
    fn setting_paging_preserves_other_bits() {
        let cr0 = Cr0::from_bits(0x0001_0011).with_pg_paging(true);
        assert_eq!(cr0.into_bits(), 0x8001_0011);
        assert!(cr0.pe_protection_enable());
        assert!(cr0.wp_write_protect());
    }
}
