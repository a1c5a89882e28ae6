//! # Address Space (i386, directory-rooted)
//!
//! One page directory plus the page tables it references.
//!
//! ## Highlights
//!
//! - [`AddressSpace::build`] allocates the directory and the tables that
//!   identity-map the shared region, and installs the self-reference for the
//!   [`SelfMapped`](TableLayout::SelfMapped) layout.
//! - [`AddressSpace::service_fault`] backs a not-present page on demand.
//! - [`AddressSpace::free_page`] returns a page's frame and unmaps it.
//! - [`AddressSpace::translate`] resolves a VA to a PA if mapped.
//! - [`AddressSpace::activate`] loads CR3 with this space's directory.
//!
//! Table access always goes through a [`TableWindow`]; which one is valid
//! depends on the layout and on whether paging is on, see
//! [`AddressSpace::window`].

use crate::fault::{FaultError, FaultResolution, PageFaultError};
use crate::info::SELF_MAP_INDEX;
use crate::window::{DirectWindow, RecursiveWindow, TableWindow, Window};
use crate::{
    AddressGate, Cr3, DirectoryIndex, FrameAlloc, Mmu, PageDirectory, PageEntryBits, PageTable,
    PhysMapper, PoolRole, TableIndex,
};
use kernel_memory_addresses::{
    ENTRIES_PER_TABLE, FrameNumber, PageNumber, PhysicalAddress, VirtualAddress, pages_for,
};
use log::{debug, trace};

/// How the tables of an address space are reached and where they come from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableLayout {
    /// Directory and tables live in the kernel pool and are always reached
    /// by physical address. Faults are serviced without validation.
    Flat,
    /// Directory and tables live in the process pool; once paging is on they
    /// are reached through directory slot 1023, which maps the directory
    /// itself. Faults are checked against the registered VM pools.
    SelfMapped,
}

impl TableLayout {
    /// Pool that supplies directory and table frames.
    #[inline]
    #[must_use]
    pub const fn table_role(self) -> PoolRole {
        match self {
            Self::Flat => PoolRole::Kernel,
            Self::SelfMapped => PoolRole::Process,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("out of {role:?} frames while building an address space")]
    OutOfFrames { role: PoolRole },
    #[error("shared region of {size:#x} bytes needs more than 1023 page tables")]
    SharedRegionTooLarge { size: u32 },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FreePageError {
    #[error("frame {frame} backing page {page} was rejected by every pool")]
    InvalidRelease { page: PageNumber, frame: FrameNumber },
}

/// Handle to a single address space.
#[derive(Debug)]
pub struct AddressSpace {
    directory: FrameNumber,
    layout: TableLayout,
}

impl AddressSpace {
    /// Allocate and fill a new directory.
    ///
    /// `[0, shared_size)` (rounded up to whole pages) is identity-mapped with
    /// one table per 4 MiB; every other directory slot is written "writable,
    /// not present". For [`TableLayout::SelfMapped`] slot 1023 maps the
    /// directory frame. On failure every frame taken so far is returned.
    ///
    /// # Safety
    /// Every frame `frames` hands out for `layout.table_role()` must be
    /// reachable through `mapper`.
    ///
    /// # Errors
    /// - [`BuildError::SharedRegionTooLarge`] if the identity tables would
    ///   reach the self-map slot.
    /// - [`BuildError::OutOfFrames`] if the table pool runs dry.
    pub unsafe fn build<M: PhysMapper, A: FrameAlloc>(
        mapper: &M,
        frames: &mut A,
        layout: TableLayout,
        shared_size: u32,
    ) -> Result<Self, BuildError> {
        let shared_pages = pages_for(shared_size) as usize;
        let shared_tables = shared_pages.div_ceil(ENTRIES_PER_TABLE);
        if shared_tables > SELF_MAP_INDEX {
            return Err(BuildError::SharedRegionTooLarge { size: shared_size });
        }

        let role = layout.table_role();
        let directory = frames
            .alloc_4k(role)
            .ok_or(BuildError::OutOfFrames { role })?;

        // SAFETY: the frame was just allocated for us and is reachable per contract.
        let pd: &mut PageDirectory = unsafe { mapper.phys_to_mut(directory.base()) };
        pd.clear();

        for t in 0..shared_tables {
            let Some(table) = frames.alloc_4k(role) else {
                // Give back the directory and every table installed so far.
                for installed in 0..t {
                    frames.free_4k(pd.get(directory_index(installed)).frame());
                }
                frames.free_4k(directory);
                return Err(BuildError::OutOfFrames { role });
            };

            // SAFETY: as above; `table` differs from `directory`.
            let pt: &mut PageTable = unsafe { mapper.phys_to_mut(table.base()) };
            identity_fill(pt, t, shared_pages);
            pd.set(directory_index(t), PageEntryBits::mapping(table));
        }

        if layout == TableLayout::SelfMapped {
            pd.set(
                directory_index(SELF_MAP_INDEX),
                PageEntryBits::mapping(directory),
            );
        }

        debug!(
            "built {layout:?} address space: directory {directory}, {shared_tables} shared table(s)"
        );
        Ok(Self { directory, layout })
    }

    /// Frame holding the page directory.
    #[inline]
    #[must_use]
    pub const fn directory_frame(&self) -> FrameNumber {
        self.directory
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> TableLayout {
        self.layout
    }

    /// CR3 value selecting this directory.
    #[inline]
    #[must_use]
    pub const fn cr3(&self) -> Cr3 {
        Cr3::from_directory_frame(self.directory)
    }

    /// Whether CR3 currently points at this directory.
    #[inline]
    pub fn is_active<M: Mmu>(&self, mmu: &M) -> bool {
        mmu.cr3().directory_frame() == self.directory
    }

    /// Load CR3 with this address space's directory, flushing the TLB.
    ///
    /// # Safety
    /// If paging is enabled, this directory must map the executing code.
    #[inline]
    pub unsafe fn activate<M: Mmu>(&self, mmu: &M) {
        unsafe { mmu.set_cr3(self.cr3()) };
    }

    /// Pick the window through which this space's tables are reachable now.
    ///
    /// | Layout | Paging off | Paging on, active | Paging on, inactive |
    /// |--------|-----------|-------------------|---------------------|
    /// | Flat | direct | direct | direct |
    /// | SelfMapped | direct | recursive | `None` |
    ///
    /// # Safety
    /// The address space must have been built through `mmu`'s physical
    /// mapping and must still own its directory.
    pub unsafe fn window<'m, M: Mmu>(&self, mmu: &'m M) -> Option<Window<'m, M>> {
        match self.layout {
            TableLayout::SelfMapped if mmu.paging_enabled() => {
                if self.is_active(mmu) {
                    // SAFETY: paging is on and our directory, which carries
                    // the self-map, is loaded.
                    Some(Window::Recursive(unsafe { RecursiveWindow::new(mmu) }))
                } else {
                    None
                }
            }
            // SAFETY: flat tables live in the identity-mapped kernel pool;
            // with paging off every frame is reachable.
            _ => Some(Window::Direct(unsafe {
                DirectWindow::new(mmu, self.directory)
            })),
        }
    }

    /// Back the page containing `address` on demand.
    ///
    /// Protection violations are refused first, then `gate` decides whether
    /// the address may be backed at all. A missing table is taken from the
    /// layout's table pool and zeroed through `window`; the data frame
    /// always comes from the process pool. If both entries are already
    /// present nothing is allocated.
    ///
    /// A table installed before the data-frame allocation fails stays in
    /// place; it is valid and will be reused.
    ///
    /// # Errors
    /// [`FaultError::ProtectionFault`], [`FaultError::IllegitimateAccess`]
    /// or [`FaultError::OutOfFrames`]; none of them allocates a data frame.
    pub fn service_fault<W, A, G>(
        &self,
        window: &mut W,
        frames: &mut A,
        gate: &G,
        address: VirtualAddress,
        code: PageFaultError,
    ) -> Result<FaultResolution, FaultError>
    where
        W: TableWindow,
        A: FrameAlloc,
        G: AddressGate + ?Sized,
    {
        if !code.is_not_present() {
            return Err(FaultError::ProtectionFault {
                address,
                code: code.into_bits(),
            });
        }
        if !gate.is_legitimate(address) {
            return Err(FaultError::IllegitimateAccess { address });
        }

        let di = DirectoryIndex::of(address);
        let ti = TableIndex::of(address);
        let mut resolution = FaultResolution::default();

        let pde = window.directory().get(di);
        let table = if let Some(frame) = pde.present_frame() {
            frame
        } else {
            let frame = frames
                .alloc_4k(self.layout.table_role())
                .ok_or(FaultError::OutOfFrames { address })?;
            window.directory().set(di, PageEntryBits::mapping(frame));
            window.table(di, frame).zero();
            resolution.table_frame = Some(frame);
            frame
        };

        let pte = window.table(di, table).get(ti);
        if !pte.present() {
            let frame = frames
                .alloc_4k(PoolRole::Process)
                .ok_or(FaultError::OutOfFrames { address })?;
            window.table(di, table).set(ti, PageEntryBits::mapping(frame));
            resolution.data_frame = Some(frame);
        }

        trace!(
            "fault at {address} ({}): table {:?}, frame {:?}",
            code.explain(),
            resolution.table_frame,
            resolution.data_frame
        );
        Ok(resolution)
    }

    /// Release the frame backing `page` and unmap it.
    ///
    /// Returns the released frame, or `None` if the page was never backed.
    /// The caller flushes the TLB.
    ///
    /// # Errors
    /// [`FreePageError::InvalidRelease`] if no pool accepts the frame; the
    /// entry is then left untouched.
    pub fn free_page<W: TableWindow, A: FrameAlloc>(
        &self,
        window: &mut W,
        frames: &mut A,
        page: PageNumber,
    ) -> Result<Option<FrameNumber>, FreePageError> {
        let di = DirectoryIndex::of_page(page);
        let ti = TableIndex::of_page(page);

        let Some(table) = window.directory().get(di).present_frame() else {
            return Ok(None);
        };
        let Some(frame) = window.table(di, table).get(ti).present_frame() else {
            return Ok(None);
        };

        if !frames.free_4k(frame) {
            return Err(FreePageError::InvalidRelease { page, frame });
        }
        window.table(di, table).set(ti, PageEntryBits::not_present());
        trace!("freed page {page} (frame {frame})");
        Ok(Some(frame))
    }

    /// Translate `va` to a physical address if mapped.
    pub fn translate<W: TableWindow>(
        &self,
        window: &mut W,
        va: VirtualAddress,
    ) -> Option<PhysicalAddress> {
        let di = DirectoryIndex::of(va);
        let table = window.directory().get(di).present_frame()?;
        let frame = window.table(di, table).get(TableIndex::of(va)).present_frame()?;
        Some(frame.base() + va.offset())
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn directory_index(i: usize) -> DirectoryIndex {
    DirectoryIndex::new(i as u16)
}

/// Identity-map the pages of table `t` that fall below `shared_pages`.
#[allow(clippy::cast_possible_truncation)]
fn identity_fill(pt: &mut PageTable, t: usize, shared_pages: usize) {
    for i in 0..ENTRIES_PER_TABLE {
        let page = t * ENTRIES_PER_TABLE + i;
        let entry = if page < shared_pages {
            PageEntryBits::mapping(FrameNumber::new(page as u32))
        } else {
            PageEntryBits::not_present()
        };
        pt.set(TableIndex::new(i as u16), entry);
    }
}
