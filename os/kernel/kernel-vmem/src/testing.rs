//! # Simulated paging hardware
//!
//! [`SimMachine`] stands in for the CPU and RAM in host tests. Physical
//! memory is one zeroed, 4 KiB-aligned host allocation starting at physical
//! address 0. Control registers are plain cells, and virtual accesses walk
//! the two-level directory in CR3 exactly like the MMU would (without a
//! TLB), so the self-map is exercised for real.
//!
//! Only the present bit is modeled; permission bits never fault.

use crate::{Cr0, Cr2, Cr3, DirectoryIndex, Mmu, PageDirectory, PageFaultError, PageTable};
use crate::{PhysMapper, TableIndex, VirtMapper};
use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use core::cell::Cell;
use core::ptr::NonNull;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

pub struct SimMachine {
    ram: NonNull<u8>,
    layout: Layout,
    cr0: Cell<Cr0>,
    cr2: Cell<Cr2>,
    cr3: Cell<Cr3>,
    cr3_writes: Cell<usize>,
}

// SAFETY: the machine exclusively owns its RAM allocation.
unsafe impl Send for SimMachine {}

impl SimMachine {
    /// A machine with `ram_bytes` of zeroed physical memory, paging off.
    ///
    /// # Panics
    /// If `ram_bytes` is zero or not a multiple of the page size.
    #[must_use]
    pub fn new(ram_bytes: u32) -> Self {
        assert!(ram_bytes > 0 && ram_bytes.is_multiple_of(PAGE_SIZE));
        let layout = Layout::from_size_align(ram_bytes as usize, PAGE_SIZE as usize)
            .unwrap_or_else(|_| panic!("invalid RAM size {ram_bytes:#x}"));
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ram) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };
        Self {
            ram,
            layout,
            cr0: Cell::new(Cr0::new().with_pe_protection_enable(true)),
            cr2: Cell::new(Cr2::default()),
            cr3: Cell::new(Cr3::new()),
            cr3_writes: Cell::new(0),
        }
    }

    /// Bytes of simulated RAM.
    #[must_use]
    pub const fn ram_size(&self) -> usize {
        self.layout.size()
    }

    /// How often CR3 was written, i.e. how many full TLB flushes happened.
    #[must_use]
    pub fn cr3_writes(&self) -> usize {
        self.cr3_writes.get()
    }

    fn phys_ptr(&self, pa: PhysicalAddress, len: usize) -> *mut u8 {
        let offset = pa.as_u32() as usize;
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.ram_size()),
            "physical access at {pa} outside simulated RAM"
        );
        // SAFETY: bounds checked above.
        unsafe { self.ram.as_ptr().add(offset) }
    }

    /// Walk the loaded directory like the MMU.
    ///
    /// With paging off, virtual equals physical.
    ///
    /// # Errors
    /// The error code a not-present fault would push.
    pub fn translate(&self, va: VirtualAddress) -> Result<PhysicalAddress, PageFaultError> {
        if !self.paging_enabled() {
            return Ok(PhysicalAddress::new(va.as_u32()));
        }
        // SAFETY: directory and tables are frames of simulated RAM; only
        // shared references are formed and dropped before returning.
        let directory = unsafe { self.phys_to_mut::<PageDirectory>(self.cr3().directory_phys()) };
        let pde = directory.get(DirectoryIndex::of(va));
        let table_frame = pde.present_frame().ok_or_else(PageFaultError::new)?;
        let table = unsafe { self.phys_to_mut::<PageTable>(table_frame.base()) };
        let frame = table
            .get(TableIndex::of(va))
            .present_frame()
            .ok_or_else(PageFaultError::new)?;
        Ok(frame.base() + va.offset())
    }

    /// Perform a CPU access to `va`. On a miss CR2 is latched and the error
    /// code returned, exactly what a trap handler would receive.
    fn access(&self, va: VirtualAddress, write: bool) -> Result<*mut u32, PageFaultError> {
        debug_assert!(va.as_u32().is_multiple_of(4), "unaligned access");
        match self.translate(va) {
            Ok(pa) => Ok(self.phys_ptr(pa, 4).cast()),
            Err(code) => {
                self.cr2.set(Cr2::from_bits(va.as_u32()));
                Err(code.with_write(write))
            }
        }
    }

    /// Read a word as the CPU would.
    ///
    /// # Errors
    /// Page-fault error code if `va` is not mapped.
    pub fn read_u32(&self, va: VirtualAddress) -> Result<u32, PageFaultError> {
        let p = self.access(va, false)?;
        // SAFETY: in-bounds, 4-byte aligned RAM.
        Ok(unsafe { p.read() })
    }

    /// Write a word as the CPU would.
    ///
    /// # Errors
    /// Page-fault error code if `va` is not mapped.
    pub fn write_u32(&self, va: VirtualAddress, value: u32) -> Result<(), PageFaultError> {
        let p = self.access(va, true)?;
        // SAFETY: in-bounds, 4-byte aligned RAM.
        unsafe { p.write(value) };
        Ok(())
    }

    /// Read a word of physical memory, bypassing translation.
    #[must_use]
    pub fn read_phys_u32(&self, pa: PhysicalAddress) -> u32 {
        // SAFETY: bounds checked by `phys_ptr`.
        unsafe { self.phys_ptr(pa, 4).cast::<u32>().read() }
    }
}

impl Drop for SimMachine {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this layout.
        unsafe { dealloc(self.ram.as_ptr(), self.layout) };
    }
}

impl PhysMapper for SimMachine {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let p = self.phys_ptr(pa, size_of::<T>());
        debug_assert!(p.cast::<T>().is_aligned());
        // SAFETY: the caller promises `T` matches the bytes and no alias exists.
        unsafe { &mut *p.cast::<T>() }
    }
}

impl VirtMapper for SimMachine {
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        let pa = self
            .translate(va)
            .unwrap_or_else(|code| panic!("kernel access to {va} faulted: {}", code.explain()));
        // SAFETY: forwarded contract.
        unsafe { self.phys_to_mut(pa) }
    }
}

impl Mmu for SimMachine {
    fn cr0(&self) -> Cr0 {
        self.cr0.get()
    }

    unsafe fn set_cr0(&self, cr0: Cr0) {
        self.cr0.set(cr0);
    }

    fn cr2(&self) -> Cr2 {
        self.cr2.get()
    }

    fn cr3(&self) -> Cr3 {
        self.cr3.get()
    }

    unsafe fn set_cr3(&self, cr3: Cr3) {
        self.cr3.set(cr3);
        self.cr3_writes.set(self.cr3_writes.get() + 1);
    }

    fn halt(&self) -> ! {
        panic!("machine halted (cr2 = {})", self.cr2().fault_address());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageEntryBits;
    use kernel_memory_addresses::FrameNumber;

    #[test]
    fn identity_access_without_paging() {
        let sim = SimMachine::new(64 * 1024);
        sim.write_u32(VirtualAddress::new(0x2000), 0xDEAD_BEEF).unwrap();
        assert_eq!(sim.read_phys_u32(PhysicalAddress::new(0x2000)), 0xDEAD_BEEF);
    }

    #[test]
    fn miss_latches_cr2_and_reports_write() {
        let sim = SimMachine::new(64 * 1024);
        // Empty directory in frame 1.
        let pd: &mut PageDirectory = unsafe { sim.phys_to_mut(PhysicalAddress::new(0x1000)) };
        pd.clear();
        unsafe {
            sim.set_cr3(Cr3::from_directory_frame(FrameNumber::new(1)));
            sim.set_cr0(sim.cr0().with_pg_paging(true));
        }

        let code = sim.write_u32(VirtualAddress::new(0x0040_0004), 1).unwrap_err();
        assert!(code.is_not_present());
        assert!(code.write());
        assert_eq!(sim.cr2().fault_address(), VirtualAddress::new(0x0040_0004));
        assert_eq!(sim.cr3_writes(), 1);
    }

    #[test]
    fn walk_through_two_levels() {
        let sim = SimMachine::new(64 * 1024);
        let pd: &mut PageDirectory = unsafe { sim.phys_to_mut(PhysicalAddress::new(0x1000)) };
        pd.clear();
        pd.set(DirectoryIndex::new(0), PageEntryBits::mapping(FrameNumber::new(2)));
        let pt: &mut PageTable = unsafe { sim.phys_to_mut(PhysicalAddress::new(0x2000)) };
        pt.zero();
        pt.set(TableIndex::new(7), PageEntryBits::mapping(FrameNumber::new(3)));
        unsafe {
            sim.set_cr3(Cr3::from_directory_frame(FrameNumber::new(1)));
            sim.set_cr0(sim.cr0().with_pg_paging(true));
        }

        sim.write_u32(VirtualAddress::new(0x7010), 42).unwrap();
        assert_eq!(sim.read_phys_u32(PhysicalAddress::new(0x3010)), 42);
        assert!(sim.read_u32(VirtualAddress::new(0x8000)).is_err());
    }
}
