use bitfield_struct::bitfield;
use kernel_memory_addresses::FrameNumber;

/// A single 32-bit i386 page-directory or page-table entry.
///
/// Directory entries (PDEs) and table entries (PTEs) share this layout. A
/// PDE points at a page table, a PTE at a data frame; with 4 KiB pages only
/// the `large_page` bit tells them apart, and this kernel never sets it.
///
/// ### Bit layout
///
/// | Bits  | Name / Mnemonic | Meaning |
/// |-------|-----------------|---------|
/// | 0     | `P`             | Valid entry if set |
/// | 1     | `RW`            | Writable if set |
/// | 2     | `US`            | User-mode accessible if set |
/// | 3     | `PWT`           | Write-through caching |
/// | 4     | `PCD`           | Disable caching |
/// | 5     | `A`             | Accessed |
/// | 6     | `D`             | Dirty (PTE only) |
/// | 7     | `PS` / `PAT`    | 4 MiB page (PDE) or PAT (PTE) |
/// | 8     | `G`             | Global (PTE only) |
/// | 9–11  | OS avail        | Reserved for OS use |
/// | 12–31 | frame           | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{FrameNumber, PageEntryBits};
/// let e = PageEntryBits::mapping(FrameNumber::new(0x401));
/// assert!(e.present() && e.writable());
/// assert_eq!(e.into_bits(), 0x0040_1003);
/// assert_eq!(PageEntryBits::not_present().into_bits(), 0b10);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    ///
    /// Clear means any access through this entry raises a not-present fault.
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first use.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a PTE.
    pub dirty: bool,

    /// Page size (PS, bit 7). Must stay clear: only 4 KiB pages exist here.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Frame number (bits 12..=31).
    #[bits(20)]
    frame_bits: u32,
}

impl PageEntryBits {
    /// "Writable, not present": the value every unused slot holds.
    #[inline]
    #[must_use]
    pub const fn not_present() -> Self {
        Self::new().with_writable(true)
    }

    /// A present, writable, supervisor entry pointing at `frame`.
    ///
    /// Used both for directory entries (pointing at a table) and table
    /// entries (pointing at a data frame).
    #[inline]
    #[must_use]
    pub const fn mapping(frame: FrameNumber) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_frame_bits(frame.as_u32())
    }

    /// The frame this entry points at; meaningful only when present.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> FrameNumber {
        FrameNumber::new(self.frame_bits())
    }

    #[inline]
    pub const fn set_frame(&mut self, frame: FrameNumber) {
        self.set_frame_bits(frame.as_u32());
    }

    /// The frame, if the entry is present.
    #[inline]
    #[must_use]
    pub const fn present_frame(&self) -> Option<FrameNumber> {
        if self.present() {
            Some(self.frame())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_high_bits() {
        let mut e = PageEntryBits::not_present();
        e.set_frame(FrameNumber::new(0xF_FFFF));
        assert_eq!(e.into_bits(), 0xFFFF_F002);
        assert_eq!(e.frame(), FrameNumber::new(0xF_FFFF));
        assert_eq!(e.present_frame(), None);
    }

    #[test]
    fn mapping_is_present_and_writable() {
        let e = PageEntryBits::mapping(FrameNumber::new(7));
        assert_eq!(e.present_frame(), Some(FrameNumber::new(7)));
        assert!(!e.user_access());
        assert!(!e.large_page());
    }
}
