//! # VM Pool
//!
//! Hands out page-aligned regions of a process's virtual address space. Only
//! address bookkeeping happens here; frames are committed later by the fault
//! handler, which asks [`VmPool::is_legitimate`] first.
//!
//! The first two pages of the managed range are reserved for the allocated
//! and free region arrays and are never handed out. Released regions become
//! new free entries; adjacent free regions are not merged.

use crate::registry::PoolId;
use core::fmt;
use kernel_memory_addresses::{PAGE_SIZE, PageNumber, VirtualAddress, pages_for};

/// Region records that fit into one bookkeeping page.
pub const REGION_CAPACITY: usize = PAGE_SIZE as usize / size_of::<Region>();

/// Pages at the start of every pool reserved for the region arrays.
pub const BOOKKEEPING_PAGES: u32 = 2;

/// Pages in the 4 GiB virtual address space.
const ADDRESS_SPACE_PAGES: u32 = 1 << 20;

/// A contiguous run of pages.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Region {
    pub base_page: PageNumber,
    pub length: u32,
}

impl Region {
    #[must_use]
    pub const fn new(base_page: PageNumber, length: u32) -> Self {
        Self { base_page, length }
    }

    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base_page.base()
    }

    #[must_use]
    pub const fn contains(&self, page: PageNumber) -> bool {
        page.as_u32() >= self.base_page.as_u32()
            && page.as_u32() - self.base_page.as_u32() < self.length
    }

    /// Whether both regions share a page.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        let (a, b) = (self.base_page.as_u32(), other.base_page.as_u32());
        a < b + other.length && b < a + self.length
    }
}

const _: () = assert!(size_of::<Region>() == 8 && REGION_CAPACITY == 512);

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmPoolError {
    #[error("pool base {base} is not page aligned")]
    Unaligned { base: VirtualAddress },
    #[error("a pool of {size:#x} bytes leaves no room after its bookkeeping pages")]
    TooSmall { size: u32 },
    #[error("pool at {base} runs past the end of the address space")]
    BeyondAddressSpace { base: VirtualAddress },
    #[error("pool at {base} overlaps the shared region, the self-map or another pool")]
    Overlap { base: VirtualAddress },
    #[error("requested zero bytes")]
    EmptyRequest,
    #[error("no free region of {pages} page(s)")]
    OutOfAddressSpace { pages: u32 },
    #[error("region array is full")]
    CapacityExceeded,
    #[error("no allocated region starts at {address}")]
    NotAllocated { address: VirtualAddress },
    #[error("no VM pool is registered under that id")]
    UnknownPool,
    #[error("too many VM pools")]
    TooManyPools,
    #[error(transparent)]
    Paging(#[from] crate::context::PagingError),
}

/// Fixed-capacity, compacting array of regions.
#[derive(Clone)]
pub struct RegionArray {
    regions: [Region; REGION_CAPACITY],
    len: usize,
}

impl Default for RegionArray {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionArray {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: [Region::new(PageNumber::new(0), 0); REGION_CAPACITY],
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.len == REGION_CAPACITY
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Region] {
        &self.regions[..self.len]
    }

    /// # Errors
    /// [`VmPoolError::CapacityExceeded`] if the array is full.
    pub fn push(&mut self, region: Region) -> Result<(), VmPoolError> {
        let slot = self
            .regions
            .get_mut(self.len)
            .ok_or(VmPoolError::CapacityExceeded)?;
        *slot = region;
        self.len += 1;
        Ok(())
    }

    /// Remove entry `index`, shifting the tail down.
    ///
    /// # Panics
    /// If `index` is out of bounds.
    pub fn remove(&mut self, index: usize) -> Region {
        assert!(index < self.len, "region index {index} out of bounds");
        let region = self.regions[index];
        self.regions.copy_within(index + 1..self.len, index);
        self.len -= 1;
        region
    }

    fn position(&self, f: impl FnMut(&Region) -> bool) -> Option<usize> {
        self.as_slice().iter().position(f)
    }
}

impl fmt::Debug for RegionArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Gives back the frame behind a page that is leaving an allocated region.
pub trait PageReclaimer {
    fn reclaim(&mut self, page: PageNumber);
}

/// Region allocator over `[base, base + size)`.
#[derive(Debug, Clone)]
pub struct VmPool {
    base: VirtualAddress,
    pages: u32,
    frame_pool: PoolId,
    allocated: RegionArray,
    free: RegionArray,
}

impl VmPool {
    /// A pool over `size` bytes (rounded down to pages) starting at `base`.
    ///
    /// # Errors
    /// [`VmPoolError::Unaligned`], [`VmPoolError::TooSmall`] if nothing is
    /// left after the bookkeeping pages, or
    /// [`VmPoolError::BeyondAddressSpace`].
    pub fn new(base: VirtualAddress, size: u32, frame_pool: PoolId) -> Result<Self, VmPoolError> {
        if !base.is_page_aligned() {
            return Err(VmPoolError::Unaligned { base });
        }
        let pages = size / PAGE_SIZE;
        if pages <= BOOKKEEPING_PAGES {
            return Err(VmPoolError::TooSmall { size });
        }
        if base.page().as_u32() + pages > ADDRESS_SPACE_PAGES {
            return Err(VmPoolError::BeyondAddressSpace { base });
        }

        let mut free = RegionArray::new();
        free.push(Region::new(
            base.page() + BOOKKEEPING_PAGES,
            pages - BOOKKEEPING_PAGES,
        ))?;
        Ok(Self {
            base,
            pages,
            frame_pool,
            allocated: RegionArray::new(),
            free,
        })
    }

    /// Reserve `size` bytes (rounded up to pages), first fit.
    ///
    /// # Errors
    /// [`VmPoolError::EmptyRequest`], [`VmPoolError::CapacityExceeded`] if
    /// the allocated array is full, or [`VmPoolError::OutOfAddressSpace`].
    pub fn allocate(&mut self, size: u32) -> Result<VirtualAddress, VmPoolError> {
        if size == 0 {
            return Err(VmPoolError::EmptyRequest);
        }
        let pages = pages_for(size);
        if self.allocated.is_full() {
            return Err(VmPoolError::CapacityExceeded);
        }
        let index = self
            .free
            .position(|r| r.length >= pages)
            .ok_or(VmPoolError::OutOfAddressSpace { pages })?;

        let base_page = self.free.regions[index].base_page;
        if self.free.regions[index].length == pages {
            self.free.remove(index);
        } else {
            let r = &mut self.free.regions[index];
            r.base_page = r.base_page + pages;
            r.length -= pages;
        }
        self.allocated.push(Region::new(base_page, pages))?;
        Ok(base_page.base())
    }

    /// Return the region starting at `address`, handing every page to
    /// `reclaimer` first.
    ///
    /// # Errors
    /// [`VmPoolError::NotAllocated`] if no allocated region starts on that
    /// page, [`VmPoolError::CapacityExceeded`] if the free array is full.
    /// Nothing changes in either case.
    pub fn release<R: PageReclaimer + ?Sized>(
        &mut self,
        address: VirtualAddress,
        reclaimer: &mut R,
    ) -> Result<Region, VmPoolError> {
        let page = address.page();
        let index = self
            .allocated
            .position(|r| r.base_page == page)
            .ok_or(VmPoolError::NotAllocated { address })?;
        if self.free.is_full() {
            return Err(VmPoolError::CapacityExceeded);
        }

        let region = self.allocated.regions[index];
        for offset in 0..region.length {
            reclaimer.reclaim(region.base_page + offset);
        }
        self.free.push(region)?;
        self.allocated.remove(index);
        Ok(region)
    }

    /// Whether `address` lies in a currently allocated region.
    #[must_use]
    pub fn is_legitimate(&self, address: VirtualAddress) -> bool {
        let page = address.page();
        self.allocated.as_slice().iter().any(|r| r.contains(page))
    }

    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Managed range in pages, bookkeeping included.
    #[must_use]
    pub const fn span(&self) -> Region {
        Region::new(self.base.page(), self.pages)
    }

    /// Frame pool this pool's pages are backed from.
    #[must_use]
    pub const fn frame_pool(&self) -> PoolId {
        self.frame_pool
    }

    /// Pages not handed out.
    #[must_use]
    pub fn free_pages(&self) -> u32 {
        self.free.as_slice().iter().map(|r| r.length).sum()
    }

    #[must_use]
    pub fn allocated_regions(&self) -> &[Region] {
        self.allocated.as_slice()
    }

    #[must_use]
    pub fn free_regions(&self) -> &[Region] {
        self.free.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = 0x4000_0000;

    #[derive(Default)]
    struct Recorder(Vec<PageNumber>);

    impl PageReclaimer for Recorder {
        fn reclaim(&mut self, page: PageNumber) {
            self.0.push(page);
        }
    }

    fn pool(pages: u32) -> VmPool {
        VmPool::new(VirtualAddress::new(BASE), pages * PAGE_SIZE, PoolId::new(1)).unwrap()
    }

    #[test]
    fn bookkeeping_pages_are_never_handed_out() {
        let mut vm = pool(10);
        assert_eq!(vm.free_pages(), 8);
        let a = vm.allocate(1).unwrap();
        assert_eq!(a.as_u32(), BASE + 2 * PAGE_SIZE);
        assert!(!vm.is_legitimate(VirtualAddress::new(BASE)));
        assert!(!vm.is_legitimate(VirtualAddress::new(BASE + PAGE_SIZE)));
    }

    #[test]
    fn released_regions_are_not_merged() {
        let mut vm = pool(10);
        let a = vm.allocate(PAGE_SIZE).unwrap();
        let b = vm.allocate(PAGE_SIZE).unwrap();
        assert_eq!(b.as_u32(), a.as_u32() + PAGE_SIZE);

        let mut rec = Recorder::default();
        vm.release(a, &mut rec).unwrap();
        assert_eq!(rec.0, [a.page()]);
        assert_eq!(
            vm.free_regions(),
            [
                Region::new(PageNumber::new((BASE >> 12) + 4), 6),
                Region::new(a.page(), 1),
            ]
        );
        assert_eq!(vm.allocated_regions(), [Region::new(b.page(), 1)]);
    }

    #[test]
    fn allocation_compares_pages_with_pages() {
        let mut vm = pool(6);
        assert_eq!(
            vm.allocate(5 * PAGE_SIZE),
            Err(VmPoolError::OutOfAddressSpace { pages: 5 })
        );
        let all = vm.allocate(4 * PAGE_SIZE - 1).unwrap();
        assert_eq!(vm.free_pages(), 0);
        assert!(vm.free_regions().is_empty());
        assert!(vm.is_legitimate(all + (4 * PAGE_SIZE - 1)));
    }

    #[test]
    fn legitimacy_ends_with_release() {
        let mut vm = pool(16);
        let a = vm.allocate(3 * PAGE_SIZE).unwrap();
        assert!(vm.is_legitimate(a + 0x2FFC));
        assert!(!vm.is_legitimate(a + 0x3000));

        vm.release(a + 0x10, &mut Recorder::default()).unwrap();
        assert!(!vm.is_legitimate(a));
        assert_eq!(vm.free_pages(), 14);
    }

    #[test]
    fn release_of_unknown_address_changes_nothing() {
        let mut vm = pool(16);
        let a = vm.allocate(2 * PAGE_SIZE).unwrap();
        let mut rec = Recorder::default();
        assert_eq!(
            vm.release(a + PAGE_SIZE, &mut rec),
            Err(VmPoolError::NotAllocated {
                address: a + PAGE_SIZE
            })
        );
        assert!(rec.0.is_empty());
        assert_eq!(vm.allocated_regions().len(), 1);
    }

    #[test]
    fn allocated_array_capacity() {
        let mut vm = pool(REGION_CAPACITY as u32 + 10);
        for _ in 0..REGION_CAPACITY {
            vm.allocate(1).unwrap();
        }
        assert_eq!(vm.allocate(1), Err(VmPoolError::CapacityExceeded));
    }

    #[test]
    fn free_array_capacity_is_checked_before_reclaiming() {
        let mut vm = pool(REGION_CAPACITY as u32 + 3);
        let regions: Vec<_> = (0..REGION_CAPACITY)
            .map(|_| vm.allocate(PAGE_SIZE).unwrap())
            .collect();
        assert_eq!(vm.free_regions().len(), 1);

        let mut rec = Recorder::default();
        for &a in &regions[..REGION_CAPACITY - 1] {
            vm.release(a, &mut rec).unwrap();
        }
        assert_eq!(vm.free_regions().len(), REGION_CAPACITY);

        let last = regions[REGION_CAPACITY - 1];
        assert_eq!(vm.release(last, &mut rec), Err(VmPoolError::CapacityExceeded));
        assert_eq!(rec.0.len(), REGION_CAPACITY - 1);
        assert!(vm.is_legitimate(last));
    }

    #[test]
    fn construction_errors() {
        assert_eq!(
            VmPool::new(VirtualAddress::new(BASE + 1), 0x10000, PoolId::new(0)).unwrap_err(),
            VmPoolError::Unaligned {
                base: VirtualAddress::new(BASE + 1)
            }
        );
        assert_eq!(
            VmPool::new(VirtualAddress::new(BASE), 3 * PAGE_SIZE - 1, PoolId::new(0)).unwrap_err(),
            VmPoolError::TooSmall {
                size: 3 * PAGE_SIZE - 1
            }
        );
        assert!(matches!(
            VmPool::new(VirtualAddress::new(0xFFFF_0000), 0x20000, PoolId::new(0)),
            Err(VmPoolError::BeyondAddressSpace { .. })
        ));
    }

    #[test]
    fn allocate_then_release_keeps_free_page_accounting() {
        let mut vm = pool(64);
        let before = vm.free_pages();
        for size in [1, PAGE_SIZE, 3 * PAGE_SIZE + 7, 10 * PAGE_SIZE] {
            let a = vm.allocate(size).unwrap();
            vm.release(a, &mut Recorder::default()).unwrap();
            assert!(vm.free_pages() >= before);
        }
    }
}
