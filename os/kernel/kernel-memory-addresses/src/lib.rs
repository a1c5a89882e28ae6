//! # Virtual and Physical Memory Address Types (i386)
//!
//! Strongly typed wrappers for the 32-bit addresses and page/frame numbers
//! used by the two-level paging code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory. |
//! | [`FrameNumber`] | Index of a 4 KiB physical frame (`address >> 12`). |
//! | [`VirtualAddress`] | A byte address in a (translated) virtual address space. |
//! | [`PageNumber`] | Index of a 4 KiB virtual page (`address >> 12`). |
//!
//! A 32-bit virtual address splits into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0040_3123);
//! let page = va.page();
//! assert_eq!(page.directory_index(), 1);
//! assert_eq!(page.table_index(), 3);
//! assert_eq!(va.offset(), 0x123);
//! assert_eq!(page.base().as_u32(), 0x0040_3000);
//!
//! let frame = PhysicalAddress::new(0x0020_0042).frame();
//! assert_eq!(frame.as_u32(), 0x200);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`.
//! - Only 4 KiB granularity exists; there are no huge pages on this target.
//! - All conversions are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_number;
mod page_number;
mod physical_address;
mod virtual_address;

pub use frame_number::FrameNumber;
pub use page_number::PageNumber;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Size of a page and of a frame, in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Number of entries in a page directory or a page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes covered by a single page table (one directory entry): 4 MiB.
#[allow(clippy::cast_possible_truncation)]
pub const BYTES_PER_TABLE: u32 = PAGE_SIZE * ENTRIES_PER_TABLE as u32;

/// Round `bytes` up to whole pages and return the page count.
///
/// ```rust
/// # use kernel_memory_addresses::pages_for;
/// assert_eq!(pages_for(0), 0);
/// assert_eq!(pages_for(1), 1);
/// assert_eq!(pages_for(4096), 1);
/// assert_eq!(pages_for(4097), 2);
/// ```
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}

const _: () = {
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(BYTES_PER_TABLE == 4 * 1024 * 1024);
};
