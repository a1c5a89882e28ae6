//! # Memory Context
//!
//! Owns everything the memory core mutates: the frame pool registry, the
//! paging configuration, the address spaces, the VM pools and the notion of
//! which address space is current. Every operation goes through
//! `&mut MemoryContext`; wrap it in [`SharedMemory`](crate::SharedMemory) for
//! a kernel-global instance.
//!
//! ## Lifecycle
//!
//! ```text
//! add_frame_pool ─► init_paging ─► create_address_space ─► load ─► enable_paging
//!                                        │                            │
//!                                        └─► create_vm_pool           └─► handle_fault
//! ```
//!
//! Self-mapped address spaces are built through the physical mapping and
//! therefore have to exist before paging is switched on: create every
//! process address space at boot, up to
//! [`MAX_ADDRESS_SPACES`](kernel_info::memory::MAX_ADDRESS_SPACES). Later
//! attempts fail with [`PagingError::PagingActive`]. Flat ones only touch the
//! identity-mapped kernel pool and may be created at any time.
//!
//! Pages of the shared region, and the table window of self-mapped spaces,
//! are never handed to [`free_page`](MemoryContext::free_page).

use crate::frame_pool::FramePoolError;
use crate::registry::{FramePoolRegistry, PoolId};
use crate::vm_pool::{PageReclaimer, Region, VmPool, VmPoolError};
use kernel_info::memory::{MAX_ADDRESS_SPACES, MAX_VM_POOLS, TABLE_WINDOW_BASE};
use kernel_memory_addresses::{
    BYTES_PER_TABLE, FrameNumber, PAGE_SIZE, PageNumber, PhysicalAddress, VirtualAddress,
    pages_for,
};
use kernel_vmem::{
    AddressGate, AddressSpace, BuildError, FaultError, FaultResolution, FrameAlloc, FreePageError,
    Mmu, OpenGate, PageFaultError, PoolRole, TableLayout, Window,
};
use log::{debug, info, warn};

/// Handle of an address space created by [`MemoryContext::create_address_space`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TableId(usize);

/// Handle of a VM pool created by [`MemoryContext::create_vm_pool`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VmPoolId(usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PagingState {
    Disabled,
    /// CR0.PG is set; there is no way back.
    Enabled,
}

/// Fixed by [`MemoryContext::init_paging`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PagingConfig {
    /// Frames for flat directories and tables, and for pool bitmaps.
    pub kernel_pool: PoolId,
    /// Frames for data pages and self-mapped tables.
    pub process_pool: PoolId,
    /// Identity-mapped bytes at the bottom of every address space.
    pub shared_size: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    #[error("paging has not been initialized")]
    NotInitialized,
    #[error("paging is already initialized")]
    AlreadyInitialized,
    #[error("frame pool {0:?} is not registered")]
    UnknownPool(PoolId),
    #[error("address space {0:?} does not exist")]
    UnknownAddressSpace(TableId),
    #[error("no room for another address space")]
    TooManyAddressSpaces,
    #[error("self-mapped address spaces must be built before paging is enabled")]
    PagingActive,
    #[error("no page table is loaded")]
    NoActiveTable,
    #[error("paging is already enabled")]
    AlreadyEnabled,
    #[error("the address space is not loaded, so its tables are unreachable")]
    InactiveAddressSpace,
    #[error("page {0} belongs to the shared region or the self-map window")]
    ReservedPage(PageNumber),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    FreePage(#[from] FreePageError),
}

struct SpaceSlot {
    space: AddressSpace,
    /// VM pools consulted by the fault handler, in registration order.
    pools: [Option<VmPoolId>; MAX_VM_POOLS],
}

struct VmPoolSlot {
    pool: VmPool,
    table: TableId,
}

/// Serves [`FrameAlloc`] requests from the configured kernel and process pools.
struct PagingFrames<'r, 'm> {
    registry: &'r mut FramePoolRegistry<'m>,
    config: PagingConfig,
}

impl FrameAlloc for PagingFrames<'_, '_> {
    fn alloc_4k(&mut self, role: PoolRole) -> Option<FrameNumber> {
        let pool = match role {
            PoolRole::Kernel => self.config.kernel_pool,
            PoolRole::Process => self.config.process_pool,
        };
        self.registry.get_frames(pool, 1).ok()
    }

    fn free_4k(&mut self, frame: FrameNumber) -> bool {
        self.registry.release_frames(frame).is_ok()
    }
}

/// Admits addresses claimed by one of an address space's VM pools.
struct RegisteredPools<'a> {
    ids: &'a [Option<VmPoolId>],
    pools: &'a [Option<VmPoolSlot>],
}

impl AddressGate for RegisteredPools<'_> {
    fn is_legitimate(&self, address: VirtualAddress) -> bool {
        self.ids.iter().flatten().any(|id| {
            self.pools[id.0]
                .as_ref()
                .is_some_and(|slot| slot.pool.is_legitimate(address))
        })
    }
}

/// Frees the frames behind pages of a region being released.
struct Reclaimer<'s, 'r, 'm, M: Mmu> {
    space: &'s AddressSpace,
    window: Window<'m, M>,
    frames: PagingFrames<'r, 'm>,
    freed: u32,
}

impl<M: Mmu> PageReclaimer for Reclaimer<'_, '_, '_, M> {
    fn reclaim(&mut self, page: PageNumber) {
        match self
            .space
            .free_page(&mut self.window, &mut self.frames, page)
        {
            Ok(Some(_)) => self.freed += 1,
            Ok(None) => {}
            Err(e) => warn!("{e}; keeping the mapping"),
        }
    }
}

pub struct MemoryContext<'m, M: Mmu> {
    mmu: &'m M,
    frames: FramePoolRegistry<'m>,
    config: Option<PagingConfig>,
    state: PagingState,
    current: Option<TableId>,
    spaces: [Option<SpaceSlot>; MAX_ADDRESS_SPACES],
    vm_pools: [Option<VmPoolSlot>; MAX_VM_POOLS],
}

impl<'m, M: Mmu> MemoryContext<'m, M> {
    /// An empty context driving `mmu`. Paging is assumed to be off.
    #[must_use]
    pub const fn new(mmu: &'m M) -> Self {
        Self {
            mmu,
            frames: FramePoolRegistry::new(),
            config: None,
            state: PagingState::Disabled,
            current: None,
            spaces: [const { None }; MAX_ADDRESS_SPACES],
            vm_pools: [const { None }; MAX_VM_POOLS],
        }
    }

    #[must_use]
    pub const fn mmu(&self) -> &'m M {
        self.mmu
    }

    #[must_use]
    pub const fn frames(&self) -> &FramePoolRegistry<'m> {
        &self.frames
    }

    pub const fn frames_mut(&mut self) -> &mut FramePoolRegistry<'m> {
        &mut self.frames
    }

    #[must_use]
    pub const fn config(&self) -> Option<PagingConfig> {
        self.config
    }

    #[must_use]
    pub const fn paging_state(&self) -> PagingState {
        self.state
    }

    /// The address space installed by the last [`load`](Self::load).
    #[must_use]
    pub const fn current(&self) -> Option<TableId> {
        self.current
    }

    /// Register a frame pool; see [`ContFramePool::new`](crate::ContFramePool::new).
    ///
    /// # Safety
    /// The metadata frames must be reachable through the context's MMU for
    /// as long as the context lives.
    ///
    /// # Errors
    /// Whatever [`FramePoolRegistry::create`] reports.
    pub unsafe fn add_frame_pool(
        &mut self,
        base: FrameNumber,
        frames: u32,
        metadata: Option<FrameNumber>,
    ) -> Result<PoolId, FramePoolError> {
        // SAFETY: forwarded to the caller.
        unsafe { self.frames.create(self.mmu, base, frames, metadata) }
    }

    /// Release a run of frames in whichever pool owns it.
    ///
    /// # Errors
    /// [`FramePoolError::InvalidRelease`].
    pub fn release_frames(&mut self, frame: FrameNumber) -> Result<u32, FramePoolError> {
        self.frames.release_frames(frame)
    }

    /// Choose the pools backing tables and data pages, and the size of the
    /// shared identity-mapped region.
    ///
    /// # Errors
    /// [`PagingError::AlreadyInitialized`] on a second call,
    /// [`PagingError::UnknownPool`] for an unregistered pool.
    pub fn init_paging(
        &mut self,
        kernel_pool: PoolId,
        process_pool: PoolId,
        shared_size: u32,
    ) -> Result<(), PagingError> {
        if self.config.is_some() {
            return Err(PagingError::AlreadyInitialized);
        }
        for pool in [kernel_pool, process_pool] {
            if self.frames.get(pool).is_none() {
                return Err(PagingError::UnknownPool(pool));
            }
        }
        self.config = Some(PagingConfig {
            kernel_pool,
            process_pool,
            shared_size,
        });
        info!("paging initialized: {shared_size:#x} shared bytes");
        Ok(())
    }

    /// Build a new address space.
    ///
    /// # Errors
    /// - [`PagingError::NotInitialized`] before [`init_paging`](Self::init_paging).
    /// - [`PagingError::PagingActive`] for a self-mapped space once paging is on.
    /// - [`PagingError::TooManyAddressSpaces`].
    /// - [`PagingError::Build`] if the table frames run out.
    pub fn create_address_space(&mut self, layout: TableLayout) -> Result<TableId, PagingError> {
        let config = self.config.ok_or(PagingError::NotInitialized)?;
        if layout == TableLayout::SelfMapped && self.state == PagingState::Enabled {
            return Err(PagingError::PagingActive);
        }
        let index = self
            .spaces
            .iter()
            .position(Option::is_none)
            .ok_or(PagingError::TooManyAddressSpaces)?;

        let mut frames = PagingFrames {
            registry: &mut self.frames,
            config,
        };
        // SAFETY: flat tables come from the identity-mapped kernel pool, and
        // self-mapped ones are only built while paging is still off.
        let space =
            unsafe { AddressSpace::build(self.mmu, &mut frames, layout, config.shared_size) }?;
        self.spaces[index] = Some(SpaceSlot {
            space,
            pools: [None; MAX_VM_POOLS],
        });
        Ok(TableId(index))
    }

    #[must_use]
    pub fn address_space(&self, table: TableId) -> Option<&AddressSpace> {
        self.slot(table).ok().map(|slot| &slot.space)
    }

    /// Make `table` the current address space and load CR3.
    ///
    /// # Errors
    /// [`PagingError::UnknownAddressSpace`].
    pub fn load(&mut self, table: TableId) -> Result<(), PagingError> {
        let space = &self.slot(table)?.space;
        // SAFETY: every address space identity-maps the shared region that
        // holds the kernel.
        unsafe { space.activate(self.mmu) };
        debug!("loaded {table:?}, directory {}", space.directory_frame());
        self.current = Some(table);
        Ok(())
    }

    /// Switch paging on. Happens once.
    ///
    /// # Errors
    /// [`PagingError::AlreadyEnabled`] or [`PagingError::NoActiveTable`].
    pub fn enable_paging(&mut self) -> Result<(), PagingError> {
        if self.state == PagingState::Enabled {
            return Err(PagingError::AlreadyEnabled);
        }
        if self.current.is_none() {
            return Err(PagingError::NoActiveTable);
        }
        // SAFETY: the loaded directory identity-maps the shared region.
        unsafe { self.mmu.set_cr0(self.mmu.cr0().with_pg_paging(true)) };
        self.state = PagingState::Enabled;
        info!("paging enabled");
        Ok(())
    }

    /// Service a page fault against the current address space.
    ///
    /// Flat spaces back any not-present page; self-mapped spaces only pages
    /// claimed by one of their VM pools.
    ///
    /// # Errors
    /// Every [`FaultError`] is fatal for the faulting context.
    pub fn handle_fault(
        &mut self,
        address: VirtualAddress,
        code: PageFaultError,
    ) -> Result<FaultResolution, FaultError> {
        let Self {
            mmu,
            frames,
            config,
            current,
            spaces,
            vm_pools,
            ..
        } = self;
        let (Some(config), Some(table)) = (*config, *current) else {
            return Err(FaultError::NoActiveTable);
        };
        let slot = spaces[table.0].as_ref().ok_or(FaultError::NoActiveTable)?;

        // SAFETY: built through this MMU and still owned by the context.
        let mut window = unsafe { slot.space.window(*mmu) }.ok_or(FaultError::NoActiveTable)?;
        let mut frames = PagingFrames {
            registry: frames,
            config,
        };
        match slot.space.layout() {
            TableLayout::Flat => {
                slot.space
                    .service_fault(&mut window, &mut frames, &OpenGate, address, code)
            }
            TableLayout::SelfMapped => {
                let gate = RegisteredPools {
                    ids: &slot.pools,
                    pools: &vm_pools[..],
                };
                slot.space
                    .service_fault(&mut window, &mut frames, &gate, address, code)
            }
        }
    }

    /// Release the frame behind `page` and unmap it.
    ///
    /// Returns the freed frame, or `None` if the page was never backed. The
    /// TLB is flushed when `table` is the loaded address space.
    ///
    /// # Errors
    /// - [`PagingError::ReservedPage`] inside the shared region, or inside
    ///   the self-map window of a self-mapped space.
    /// - [`PagingError::InactiveAddressSpace`] for a self-mapped space that
    ///   is not loaded while paging is on.
    /// - [`PagingError::FreePage`] if the frame release is rejected; the
    ///   mapping then stays.
    pub fn free_page(
        &mut self,
        table: TableId,
        page: PageNumber,
    ) -> Result<Option<FrameNumber>, PagingError> {
        let config = self.config.ok_or(PagingError::NotInitialized)?;
        let slot = Self::slot_in(&self.spaces, table)?;
        if overlaps_reserved(config, slot.space.layout(), &Region::new(page, 1)) {
            return Err(PagingError::ReservedPage(page));
        }
        // SAFETY: built through this MMU and still owned by the context.
        let mut window =
            unsafe { slot.space.window(self.mmu) }.ok_or(PagingError::InactiveAddressSpace)?;
        let mut frames = PagingFrames {
            registry: &mut self.frames,
            config,
        };
        let freed = slot.space.free_page(&mut window, &mut frames, page)?;
        if freed.is_some() && slot.space.is_active(self.mmu) {
            // SAFETY: reloading the directory that is already loaded.
            unsafe { slot.space.activate(self.mmu) };
        }
        Ok(freed)
    }

    /// Physical address behind `va` in `table`, if mapped.
    ///
    /// # Errors
    /// [`PagingError::UnknownAddressSpace`] or
    /// [`PagingError::InactiveAddressSpace`].
    pub fn translate(
        &self,
        table: TableId,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, PagingError> {
        let slot = self.slot(table)?;
        // SAFETY: built through this MMU and still owned by the context.
        let mut window =
            unsafe { slot.space.window(self.mmu) }.ok_or(PagingError::InactiveAddressSpace)?;
        Ok(slot.space.translate(&mut window, va))
    }

    /// Create a VM pool over `[base, base + size)` in `table` and register it
    /// with that address space's fault handler.
    ///
    /// # Errors
    /// - [`VmPoolError::Paging`] for an unknown address space or frame pool.
    /// - [`VmPoolError::Overlap`] if the range touches the shared region, the
    ///   self-map window or another pool of the same address space.
    /// - [`VmPoolError::TooManyPools`].
    /// - Whatever [`VmPool::new`] reports.
    pub fn create_vm_pool(
        &mut self,
        table: TableId,
        base: VirtualAddress,
        size: u32,
        frame_pool: PoolId,
    ) -> Result<VmPoolId, VmPoolError> {
        let config = self.config.ok_or(PagingError::NotInitialized)?;
        if self.frames.get(frame_pool).is_none() {
            return Err(PagingError::UnknownPool(frame_pool).into());
        }
        let slot = self.slot(table)?;
        let pool = VmPool::new(base, size, frame_pool)?;

        let span = pool.span();
        let clashes = overlaps_reserved(config, slot.space.layout(), &span)
            || self
                .vm_pools
                .iter()
                .flatten()
                .any(|other| other.table == table && other.pool.span().overlaps(&span));
        if clashes {
            return Err(VmPoolError::Overlap { base });
        }

        let listed = slot
            .pools
            .iter()
            .position(Option::is_none)
            .ok_or(VmPoolError::TooManyPools)?;
        let index = self
            .vm_pools
            .iter()
            .position(Option::is_none)
            .ok_or(VmPoolError::TooManyPools)?;

        let id = VmPoolId(index);
        self.vm_pools[index] = Some(VmPoolSlot { pool, table });
        if let Some(slot) = self.spaces[table.0].as_mut() {
            slot.pools[listed] = Some(id);
        }
        debug!("VM pool {id:?} at {base} ({size:#x} bytes) registered with {table:?}");
        Ok(id)
    }

    #[must_use]
    pub fn vm_pool(&self, pool: VmPoolId) -> Option<&VmPool> {
        self.vm_pools.get(pool.0)?.as_ref().map(|slot| &slot.pool)
    }

    /// Reserve `size` bytes of address space in `pool`.
    ///
    /// # Errors
    /// [`VmPoolError::UnknownPool`], or what [`VmPool::allocate`] reports.
    pub fn vm_allocate(&mut self, pool: VmPoolId, size: u32) -> Result<VirtualAddress, VmPoolError> {
        let slot = self
            .vm_pools
            .get_mut(pool.0)
            .and_then(Option::as_mut)
            .ok_or(VmPoolError::UnknownPool)?;
        let address = slot.pool.allocate(size)?;
        debug!("{pool:?}: allocated {size:#x} bytes at {address}");
        Ok(address)
    }

    /// Return the region starting at `address` to `pool`, freeing every
    /// backed page.
    ///
    /// A page whose frame is rejected keeps its mapping; the release goes on.
    ///
    /// # Errors
    /// - [`VmPoolError::UnknownPool`].
    /// - [`VmPoolError::Paging`] with [`PagingError::InactiveAddressSpace`]
    ///   if the pool's address space is self-mapped and not loaded; nothing
    ///   changes then.
    /// - What [`VmPool::release`] reports.
    pub fn vm_release(&mut self, pool: VmPoolId, address: VirtualAddress) -> Result<Region, VmPoolError> {
        let config = self.config.ok_or(PagingError::NotInitialized)?;
        let vm = self
            .vm_pools
            .get_mut(pool.0)
            .and_then(Option::as_mut)
            .ok_or(VmPoolError::UnknownPool)?;
        let slot = Self::slot_in(&self.spaces, vm.table)?;
        // SAFETY: built through this MMU and still owned by the context.
        let window =
            unsafe { slot.space.window(self.mmu) }.ok_or(PagingError::InactiveAddressSpace)?;

        let mut reclaimer = Reclaimer {
            space: &slot.space,
            window,
            frames: PagingFrames {
                registry: &mut self.frames,
                config,
            },
            freed: 0,
        };
        let region = vm.pool.release(address, &mut reclaimer)?;
        if reclaimer.freed > 0 && slot.space.is_active(self.mmu) {
            // SAFETY: reloading the directory that is already loaded.
            unsafe { slot.space.activate(self.mmu) };
        }
        debug!(
            "{pool:?}: released {} page(s) at {address}, {} frame(s) freed",
            region.length, reclaimer.freed
        );
        Ok(region)
    }

    /// Whether `address` lies in a region currently allocated from `pool`.
    #[must_use]
    pub fn is_legitimate(&self, pool: VmPoolId, address: VirtualAddress) -> bool {
        self.vm_pool(pool)
            .is_some_and(|vm| vm.is_legitimate(address))
    }

    fn slot(&self, table: TableId) -> Result<&SpaceSlot, PagingError> {
        Self::slot_in(&self.spaces, table)
    }

    fn slot_in(
        spaces: &[Option<SpaceSlot>; MAX_ADDRESS_SPACES],
        table: TableId,
    ) -> Result<&SpaceSlot, PagingError> {
        spaces
            .get(table.0)
            .and_then(Option::as_ref)
            .ok_or(PagingError::UnknownAddressSpace(table))
    }
}

/// Whether `span` touches pages no VM pool or page release may claim: the
/// shared identity map, and the table window of a self-mapped space.
fn overlaps_reserved(config: PagingConfig, layout: TableLayout, span: &Region) -> bool {
    let shared = Region::new(PageNumber::new(0), pages_for(config.shared_size));
    let self_map = Region::new(
        VirtualAddress::new(TABLE_WINDOW_BASE).page(),
        BYTES_PER_TABLE / PAGE_SIZE,
    );
    span.overlaps(&shared) || (layout == TableLayout::SelfMapped && span.overlaps(&self_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContFramePool;
    use crate::frame_pool::FrameState;
    use kernel_vmem::testing::SimMachine;

    const RAM: u32 = 16 * 1024 * 1024;
    const SHARED: u32 = 4 * 1024 * 1024;

    fn not_present() -> PageFaultError {
        PageFaultError::new()
    }

    /// Kernel pool [2 MiB, 4 MiB), process pool [4 MiB, 16 MiB).
    fn context(machine: &SimMachine) -> MemoryContext<'_, SimMachine> {
        let mut ctx = MemoryContext::new(machine);
        let kernel = unsafe { ctx.add_frame_pool(FrameNumber::new(512), 512, None) }.unwrap();
        let info_frames = ContFramePool::needed_info_frames(3072);
        let info = ctx.frames_mut().get_frames(kernel, info_frames).unwrap();
        let process =
            unsafe { ctx.add_frame_pool(FrameNumber::new(1024), 3072, Some(info)) }.unwrap();
        ctx.init_paging(kernel, process, SHARED).unwrap();
        ctx
    }

    fn process_free(ctx: &MemoryContext<'_, SimMachine>) -> u32 {
        let pool = ctx.config().unwrap().process_pool;
        ctx.frames().get(pool).unwrap().free_frames()
    }

    #[test]
    fn lifecycle_errors() {
        let machine = SimMachine::new(RAM);
        let mut ctx = MemoryContext::new(&machine);
        assert_eq!(
            ctx.create_address_space(TableLayout::Flat),
            Err(PagingError::NotInitialized)
        );
        assert_eq!(ctx.enable_paging(), Err(PagingError::NoActiveTable));

        let mut ctx = context(&machine);
        let config = ctx.config().unwrap();
        assert_eq!(
            ctx.init_paging(config.kernel_pool, config.process_pool, SHARED),
            Err(PagingError::AlreadyInitialized)
        );

        let flat = ctx.create_address_space(TableLayout::Flat).unwrap();
        ctx.load(flat).unwrap();
        ctx.enable_paging().unwrap();
        assert_eq!(ctx.paging_state(), PagingState::Enabled);
        assert_eq!(ctx.enable_paging(), Err(PagingError::AlreadyEnabled));
        assert_eq!(
            ctx.create_address_space(TableLayout::SelfMapped),
            Err(PagingError::PagingActive)
        );
        assert!(ctx.create_address_space(TableLayout::Flat).is_ok());
    }

    #[test]
    fn unknown_pools_are_rejected() {
        let machine = SimMachine::new(RAM);
        let mut ctx = MemoryContext::new(&machine);
        let kernel = unsafe { ctx.add_frame_pool(FrameNumber::new(512), 512, None) }.unwrap();
        assert_eq!(
            ctx.init_paging(kernel, PoolId::new(5), SHARED),
            Err(PagingError::UnknownPool(PoolId::new(5)))
        );
    }

    #[test]
    fn flat_fault_backs_any_page() {
        let machine = SimMachine::new(RAM);
        let mut ctx = context(&machine);
        let flat = ctx.create_address_space(TableLayout::Flat).unwrap();
        ctx.load(flat).unwrap();
        ctx.enable_paging().unwrap();

        let va = VirtualAddress::new(0x0080_0010);
        let code = machine.write_u32(va, 7).unwrap_err();
        let resolution = ctx.handle_fault(machine.cr2().fault_address(), code).unwrap();
        let table = resolution.table_frame.unwrap();
        assert_eq!(
            ctx.frames().owner_of(table),
            Some(ctx.config().unwrap().kernel_pool)
        );
        machine.write_u32(va, 7).unwrap();
        assert_eq!(machine.read_u32(va), Ok(7));
        assert_eq!(
            ctx.translate(flat, va).unwrap(),
            Some(resolution.data_frame.unwrap().base() + 0x10)
        );
    }

    #[test]
    fn fault_without_loaded_table() {
        let machine = SimMachine::new(RAM);
        let mut ctx = context(&machine);
        assert_eq!(
            ctx.handle_fault(VirtualAddress::new(0x0100_0000), not_present()),
            Err(FaultError::NoActiveTable)
        );
    }

    #[test]
    fn vm_pool_overlaps_are_rejected() {
        let machine = SimMachine::new(RAM);
        let mut ctx = context(&machine);
        let table = ctx.create_address_space(TableLayout::SelfMapped).unwrap();
        let process = ctx.config().unwrap().process_pool;

        assert_eq!(
            ctx.create_vm_pool(table, VirtualAddress::new(0x0030_0000), 0x20_0000, process),
            Err(VmPoolError::Overlap {
                base: VirtualAddress::new(0x0030_0000)
            })
        );
        assert_eq!(
            ctx.create_vm_pool(table, VirtualAddress::new(0xFFC0_0000), 0x10_0000, process),
            Err(VmPoolError::Overlap {
                base: VirtualAddress::new(0xFFC0_0000)
            })
        );
        let first = ctx.create_vm_pool(table, VirtualAddress::new(0x4000_0000), 0x10_0000, process);
        assert!(first.is_ok());
        assert!(matches!(
            ctx.create_vm_pool(table, VirtualAddress::new(0x400F_0000), 0x10_0000, process),
            Err(VmPoolError::Overlap { .. })
        ));
        assert_eq!(
            ctx.create_vm_pool(TableId(7), VirtualAddress::new(0x5000_0000), 0x10_0000, process),
            Err(VmPoolError::Paging(PagingError::UnknownAddressSpace(TableId(7))))
        );
    }

    #[test]
    fn inactive_self_mapped_space_cannot_release() {
        let machine = SimMachine::new(RAM);
        let mut ctx = context(&machine);
        let a = ctx.create_address_space(TableLayout::SelfMapped).unwrap();
        let b = ctx.create_address_space(TableLayout::SelfMapped).unwrap();
        let process = ctx.config().unwrap().process_pool;
        let pool = ctx
            .create_vm_pool(b, VirtualAddress::new(0x4000_0000), 0x10_0000, process)
            .unwrap();
        let region = ctx.vm_allocate(pool, PAGE_SIZE).unwrap();

        ctx.load(a).unwrap();
        ctx.enable_paging().unwrap();
        assert_eq!(
            ctx.vm_release(pool, region),
            Err(VmPoolError::Paging(PagingError::InactiveAddressSpace))
        );
        assert!(ctx.is_legitimate(pool, region));
        assert_eq!(
            ctx.free_page(b, region.page()),
            Err(PagingError::InactiveAddressSpace)
        );
    }

    #[test]
    fn release_frees_backed_pages_and_flushes() {
        let machine = SimMachine::new(RAM);
        let mut ctx = context(&machine);
        let table = ctx.create_address_space(TableLayout::SelfMapped).unwrap();
        let process = ctx.config().unwrap().process_pool;
        let pool = ctx
            .create_vm_pool(table, VirtualAddress::new(0x4000_0000), 0x10_0000, process)
            .unwrap();
        ctx.load(table).unwrap();
        ctx.enable_paging().unwrap();

        let region = ctx.vm_allocate(pool, 3 * PAGE_SIZE).unwrap();
        // Touch the first and the last page only.
        for va in [region, region + 2 * PAGE_SIZE] {
            let code = machine.read_u32(va).unwrap_err();
            ctx.handle_fault(va, code).unwrap();
        }
        let backed = process_free(&ctx);
        let flushes = machine.cr3_writes();

        let released = ctx.vm_release(pool, region).unwrap();
        assert_eq!(released.length, 3);
        assert_eq!(process_free(&ctx), backed + 2);
        assert_eq!(machine.cr3_writes(), flushes + 1);
        assert!(machine.read_u32(region).is_err());
        assert!(!ctx.is_legitimate(pool, region));
    }

    #[test]
    fn free_page_of_unbacked_page_is_a_no_op() {
        let machine = SimMachine::new(RAM);
        let mut ctx = context(&machine);
        let flat = ctx.create_address_space(TableLayout::Flat).unwrap();
        ctx.load(flat).unwrap();
        let flushes = machine.cr3_writes();
        assert_eq!(ctx.free_page(flat, PageNumber::new(0x4_0000)), Ok(None));
        assert_eq!(machine.cr3_writes(), flushes);
    }

    #[test]
    fn shared_pages_are_never_freed() {
        let machine = SimMachine::new(RAM);
        let mut ctx = context(&machine);
        let kernel = ctx.config().unwrap().kernel_pool;
        let flat = ctx.create_address_space(TableLayout::Flat).unwrap();
        ctx.load(flat).unwrap();

        // Frame 513 holds the process pool's bitmap and is identity-mapped.
        let bitmap = PageNumber::new(513);
        assert_eq!(ctx.free_page(flat, bitmap), Err(PagingError::ReservedPage(bitmap)));
        assert_eq!(
            ctx.frames().get(kernel).unwrap().state(FrameNumber::new(513)),
            Some(FrameState::Head)
        );
        assert_ne!(ctx.frames_mut().get_frames(kernel, 1), Ok(FrameNumber::new(513)));
        assert_eq!(
            ctx.translate(flat, bitmap.base()),
            Ok(Some(PhysicalAddress::new(513 * PAGE_SIZE)))
        );
    }

    #[test]
    fn self_map_window_is_never_freed() {
        let machine = SimMachine::new(RAM);
        let mut ctx = context(&machine);
        let table = ctx.create_address_space(TableLayout::SelfMapped).unwrap();
        ctx.load(table).unwrap();
        ctx.enable_paging().unwrap();
        let process_before = process_free(&ctx);

        let first_table = VirtualAddress::new(TABLE_WINDOW_BASE).page();
        assert_eq!(
            ctx.free_page(table, first_table),
            Err(PagingError::ReservedPage(first_table))
        );
        assert_eq!(process_free(&ctx), process_before);
        assert_eq!(
            ctx.translate(table, VirtualAddress::new(0x0020_1000)),
            Ok(Some(PhysicalAddress::new(0x0020_1000)))
        );

        // Flat spaces have no window there.
        let flat = ctx.create_address_space(TableLayout::Flat).unwrap();
        assert_eq!(ctx.free_page(flat, first_table), Ok(None));
    }
}
