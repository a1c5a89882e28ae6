use bitfield_struct::bitfield;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress};

/// CR3 — Page-Directory Base Register (32-bit paging, no PAE).
///
/// Holds the physical base of the page directory together with the cache
/// controls used for directory walks. Writing CR3 also flushes every
/// non-global TLB entry.
#[bitfield(u32)]
pub struct Cr3 {
    /// Bits 0–2 — Reserved (must be 0).
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3 — PWT: Page-level Write-Through for the directory.
    pub pwt: bool,

    /// Bit 4 — PCD: Page-level Cache Disable for the directory.
    pub pcd: bool,

    /// Bits 5–11 — Reserved (must be 0 when written).
    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12–31 — Page directory physical base >> 12.
    #[bits(20)]
    directory_base_4k: u32,
}

impl Cr3 {
    /// Create a `Cr3` value pointing at the directory held in `frame`.
    #[must_use]
    pub const fn from_directory_frame(frame: FrameNumber) -> Self {
        Self::new().with_directory_base_4k(frame.as_u32())
    }

    /// Create a `Cr3` value from a directory physical base address.
    ///
    /// `directory_phys` must be 4 KiB-aligned.
    #[must_use]
    pub fn from_directory_phys(directory_phys: PhysicalAddress) -> Self {
        debug_assert!(
            directory_phys.is_frame_aligned(),
            "directory base must be 4K-aligned"
        );
        Self::from_directory_frame(directory_phys.frame())
    }

    /// Frame holding the page directory.
    #[must_use]
    pub const fn directory_frame(&self) -> FrameNumber {
        FrameNumber::new(self.directory_base_4k())
    }

    /// Physical address of the page directory.
    #[must_use]
    pub const fn directory_phys(&self) -> PhysicalAddress {
        self.directory_frame().base()
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u32;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_base_occupies_high_bits() {
        let cr3 = Cr3::from_directory_phys(PhysicalAddress::new(0x0020_0000));
        assert_eq!(cr3.into_bits(), 0x0020_0000);
        assert_eq!(cr3.directory_frame(), FrameNumber::new(0x200));
    }

    #[test]
    fn cache_flags_do_not_leak_into_base() {
        let cr3 = Cr3::from_directory_frame(FrameNumber::new(0x401))
            .with_pwt(true)
            .with_pcd(true);
        assert_eq!(cr3.into_bits(), 0x0040_1018);
        assert_eq!(cr3.directory_phys(), PhysicalAddress::new(0x0040_1000));
    }
}
