//! # Page directory and page table frames
//!
//! Both levels are 4 KiB-aligned arrays of 1024 [`PageEntryBits`]; they only
//! differ in which part of the virtual address indexes them and in what a
//! present entry points to.
//!
//! After modifying active mappings the caller must perform any required TLB
//! maintenance.

use crate::PageEntryBits;
use kernel_memory_addresses::{ENTRIES_PER_TABLE, PageNumber, VirtualAddress};

/// Index into the page directory (virtual address bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// Index into a page table (virtual address bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl DirectoryIndex {
    /// Construct from a raw value.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of_page(page: PageNumber) -> Self {
        Self::new(page.directory_index() as u16)
    }

    #[inline]
    #[must_use]
    pub const fn of(va: VirtualAddress) -> Self {
        Self::of_page(va.page())
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl TableIndex {
    /// Construct from a raw value.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of_page(page: PageNumber) -> Self {
        Self::new(page.table_index() as u16)
    }

    #[inline]
    #[must_use]
    pub const fn of(va: VirtualAddress) -> Self {
        Self::of_page(va.page())
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The page directory: 1024 PDEs, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

/// A page table: 1024 PTEs, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PageEntryBits {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PageEntryBits) {
        self.entries[i.as_usize()] = e;
    }

    /// Mark every slot "writable, not present".
    #[inline]
    pub fn clear(&mut self) {
        self.entries.fill(PageEntryBits::not_present());
    }
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageEntryBits {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageEntryBits) {
        self.entries[i.as_usize()] = e;
    }

    /// Write all-zero entries.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::new());
    }

    /// Iterate over all entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = PageEntryBits> + '_ {
        self.entries.iter().copied()
    }
}

const _: () = {
    assert!(size_of::<PageDirectory>() == 4096);
    assert!(size_of::<PageTable>() == 4096);
};
