use crate::{ENTRIES_PER_TABLE, PAGE_SHIFT, VirtualAddress};
use core::fmt;
use core::ops::Add;

/// Number of a 4 KiB virtual page.
///
/// The high ten bits select the page-directory entry, the low ten bits the
/// entry inside that page table.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageNumber(u32);

impl PageNumber {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// First byte of the page.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.0 << PAGE_SHIFT)
    }

    /// Index into the page directory (virtual address bits `[31:22]`).
    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.0 as usize) / ENTRIES_PER_TABLE
    }

    /// Index into the page table (virtual address bits `[21:12]`).
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        (self.0 as usize) % ENTRIES_PER_TABLE
    }
}

impl fmt::Debug for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({:#x})", self.0)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Add<u32> for PageNumber {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}
