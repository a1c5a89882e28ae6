//! # Virtual Memory Support (i386, two-level paging)
//!
//! Page-directory and page-table handling for a 32-bit x86 kernel that maps
//! memory on demand.
//!
//! ## What you get
//! - [`PageEntryBits`], the 32-bit entry format shared by directories and tables.
//! - [`PageDirectory`] / [`PageTable`], 4 KiB-aligned arrays of 1024 entries.
//! - [`AddressSpace`], one directory plus the tables it references, in either
//!   the [`Flat`](TableLayout::Flat) or the [`SelfMapped`](TableLayout::SelfMapped) layout.
//! - [`TableWindow`], the capability to reach a directory or table in memory,
//!   either by physical address ([`DirectWindow`]) or through the self-map
//!   ([`RecursiveWindow`]).
//! - [`PageFaultError`] and [`FaultError`] for the demand-paging path.
//! - The platform seams [`FrameAlloc`], [`PhysMapper`], [`VirtMapper`] and [`Mmu`].
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//!
//!  CR3 → Page Directory → Page Table → 4 KiB frame
//!          (PDE)            (PTE)
//! ```
//!
//! Each level holds 1024 four-byte entries, so one table covers 4 MiB and
//! the directory covers the full 4 GiB.
//!
//! ## The self-map
//!
//! In the self-mapped layout directory entry 1023 points back at the
//! directory frame. The CPU then treats the directory as the table for the
//! top 4 MiB of the address space:
//!
//! ```text
//! 0xFFC0_0000 | d << 12   →  page table d
//! 0xFFFF_F000             →  the page directory itself
//! ```
//!
//! so the fault handler can edit any table of the *current* address space
//! without a physical mapping.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

#[cfg(any(test, feature = "testing"))]
extern crate alloc;

pub mod address_space;
mod entry;
pub mod fault;
mod table;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod window;
#[cfg(all(feature = "asm", target_arch = "x86"))]
pub mod x86;

pub use crate::address_space::{AddressSpace, BuildError, FreePageError, TableLayout};
pub use crate::entry::PageEntryBits;
pub use crate::fault::{FaultError, FaultResolution, PageFaultError};
pub use crate::table::{DirectoryIndex, PageDirectory, PageTable, TableIndex};
pub use crate::window::{DirectWindow, RecursiveWindow, TableWindow, Window};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

pub use kernel_memory_addresses::{
    ENTRIES_PER_TABLE, FrameNumber, PAGE_SIZE, PageNumber, PhysicalAddress, VirtualAddress,
};
pub use kernel_registers::{cr0::Cr0, cr2::Cr2, cr3::Cr3};

/// Which pool a frame request is served from.
///
/// The kernel pool lives inside the shared identity map and is always
/// reachable by physical address; the process pool is not.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoolRole {
    Kernel,
    Process,
}

/// Source of **physical** 4 KiB frames for page tables and data pages.
pub trait FrameAlloc {
    /// Allocate one frame from the pool playing `role`.
    ///
    /// Returns `None` when that pool is exhausted.
    fn alloc_4k(&mut self, role: PoolRole) -> Option<FrameNumber>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    ///
    /// Returns `false` if no pool accepted the frame.
    fn free_4k(&mut self, frame: FrameNumber) -> bool;
}

/// Converts physical addresses to usable references.
///
/// # Safety
/// - The physical range `[pa, pa + size_of::<T>())` must be reachable through
///   whatever mapping the implementation relies on.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` and no other live reference may
///   alias them.
pub trait PhysMapper {
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Converts virtual addresses of the *current* address space to references.
pub trait VirtMapper {
    /// # Safety
    /// `va` must be mapped writable in the loaded directory with paging
    /// enabled (or be a valid physical address with paging disabled), and
    /// the same aliasing rules as [`PhysMapper::phys_to_mut`] apply.
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T;
}

/// The paging hardware: control registers plus memory access.
///
/// Implemented by [`x86::X86Mmu`] on real hardware and by
/// [`testing::SimMachine`] for host tests.
pub trait Mmu: PhysMapper + VirtMapper {
    fn cr0(&self) -> Cr0;

    /// # Safety
    /// Setting `PG` requires a valid directory in CR3 that maps the
    /// currently executing code.
    unsafe fn set_cr0(&self, cr0: Cr0);

    /// Linear address of the most recent page fault.
    fn cr2(&self) -> Cr2;

    fn cr3(&self) -> Cr3;

    /// Load CR3, which also flushes the TLB.
    ///
    /// # Safety
    /// The directory must map the currently executing code once paging is on.
    unsafe fn set_cr3(&self, cr3: Cr3);

    /// Stop the faulting context for good.
    fn halt(&self) -> !;

    /// Whether CR0.PG is set.
    #[inline]
    fn paging_enabled(&self) -> bool {
        self.cr0().pg_paging()
    }
}

/// Decides whether a faulting address may be backed on demand.
pub trait AddressGate {
    fn is_legitimate(&self, address: VirtualAddress) -> bool;
}

/// Admits every address; used by the flat layout.
pub struct OpenGate;

impl AddressGate for OpenGate {
    #[inline]
    fn is_legitimate(&self, _address: VirtualAddress) -> bool {
        true
    }
}
