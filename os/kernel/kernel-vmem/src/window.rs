//! # Table windows
//!
//! A [`TableWindow`] turns "the directory" or "the table behind directory
//! slot `d`" into a usable reference. Two strategies exist:
//!
//! - [`DirectWindow`] reaches frames by physical address through a
//!   [`PhysMapper`]. Valid before paging is on, and afterwards for frames
//!   inside the shared identity map (the kernel pool).
//! - [`RecursiveWindow`] goes through the self-map of the *current*
//!   directory at the fixed virtual addresses `0xFFFF_F000` and
//!   `0xFFC0_0000 | d << 12`.
//!
//! Borrows returned from a window are tied to `&mut self`, so a directory
//! and a table reference can never be alive at the same time. With the
//! self-map both can name the same frame.

use crate::info::{DIRECTORY_WINDOW, table_window};
use crate::{DirectoryIndex, Mmu, PageDirectory, PageTable, PhysMapper, VirtMapper};
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

pub trait TableWindow {
    /// The page directory.
    fn directory(&mut self) -> &mut PageDirectory;

    /// The page table installed at directory slot `index`, living in `frame`.
    ///
    /// Implementations use whichever of the two they need; callers pass both
    /// so the strategy stays interchangeable.
    fn table(&mut self, index: DirectoryIndex, frame: FrameNumber) -> &mut PageTable;
}

/// Window that reaches tables through their physical frames.
pub struct DirectWindow<'m, M: PhysMapper> {
    mapper: &'m M,
    directory: FrameNumber,
}

impl<'m, M: PhysMapper> DirectWindow<'m, M> {
    /// # Safety
    /// `directory` and every table frame it references must be reachable
    /// through `mapper` for the lifetime of the window.
    #[inline]
    pub const unsafe fn new(mapper: &'m M, directory: FrameNumber) -> Self {
        Self { mapper, directory }
    }
}

impl<M: PhysMapper> TableWindow for DirectWindow<'_, M> {
    #[inline]
    fn directory(&mut self) -> &mut PageDirectory {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { self.mapper.phys_to_mut(self.directory.base()) }
    }

    #[inline]
    fn table(&mut self, _index: DirectoryIndex, frame: FrameNumber) -> &mut PageTable {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { self.mapper.phys_to_mut(frame.base()) }
    }
}

/// Window that reaches tables through the self-map of the loaded directory.
pub struct RecursiveWindow<'m, V: VirtMapper> {
    mapper: &'m V,
}

impl<'m, V: VirtMapper> RecursiveWindow<'m, V> {
    /// # Safety
    /// Paging must be enabled and the loaded directory must carry the
    /// self-reference in slot 1023 for the lifetime of the window.
    #[inline]
    pub const unsafe fn new(mapper: &'m V) -> Self {
        Self { mapper }
    }
}

impl<V: VirtMapper> TableWindow for RecursiveWindow<'_, V> {
    #[inline]
    fn directory(&mut self) -> &mut PageDirectory {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { self.mapper.virt_to_mut(VirtualAddress::new(DIRECTORY_WINDOW)) }
    }

    #[inline]
    fn table(&mut self, index: DirectoryIndex, _frame: FrameNumber) -> &mut PageTable {
        // SAFETY: guaranteed by the constructor contract; slot `index` is
        // present, otherwise the caller would not know its frame.
        unsafe { self.mapper.virt_to_mut(table_window(index.as_usize())) }
    }
}

/// Either window, chosen at run time from the address space layout and the
/// paging state.
pub enum Window<'m, M: Mmu> {
    Direct(DirectWindow<'m, M>),
    Recursive(RecursiveWindow<'m, M>),
}

impl<M: Mmu> TableWindow for Window<'_, M> {
    #[inline]
    fn directory(&mut self) -> &mut PageDirectory {
        match self {
            Self::Direct(w) => w.directory(),
            Self::Recursive(w) => w.directory(),
        }
    }

    #[inline]
    fn table(&mut self, index: DirectoryIndex, frame: FrameNumber) -> &mut PageTable {
        match self {
            Self::Direct(w) => w.table(index, frame),
            Self::Recursive(w) => w.table(index, frame),
        }
    }
}
