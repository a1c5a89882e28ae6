//! End-to-end demand paging on the simulated machine with the standard layout.

use kernel_alloc::{MemoryContext, PoolId, TableId, VmPoolId, bootstrap, page_fault_trap};
use kernel_alloc::{SharedMemory, VmPoolError};
use kernel_info::memory::{MemoryLayout, SELF_MAP_INDEX};
use kernel_vmem::testing::SimMachine;
use kernel_vmem::{
    DirectoryIndex, FaultError, PAGE_SIZE, PageDirectory, PhysMapper, TableLayout, VirtualAddress,
};

const RAM: u32 = 32 * 1024 * 1024;
const HEAP_BASE: u32 = 0x4000_0000;
const HEAP_SIZE: u32 = 0x0100_0000;

struct Process<'m> {
    memory: MemoryContext<'m, SimMachine>,
    process_pool: PoolId,
    table: TableId,
    heap: VmPoolId,
}

fn process(machine: &SimMachine) -> Process<'_> {
    let mut memory = MemoryContext::new(machine);
    let pools = unsafe { bootstrap(&mut memory, &MemoryLayout::STANDARD) }.unwrap();
    let table = memory.create_address_space(TableLayout::SelfMapped).unwrap();
    let heap = memory
        .create_vm_pool(
            table,
            VirtualAddress::new(HEAP_BASE),
            HEAP_SIZE,
            pools.process,
        )
        .unwrap();
    memory.load(table).unwrap();
    memory.enable_paging().unwrap();
    Process {
        memory,
        process_pool: pools.process,
        table,
        heap,
    }
}

impl Process<'_> {
    fn process_free(&self) -> u32 {
        self.memory
            .frames()
            .get(self.process_pool)
            .unwrap()
            .free_frames()
    }
}

#[test]
fn self_map_points_at_the_directory() {
    let machine = SimMachine::new(RAM);
    let p = process(&machine);
    let space = p.memory.address_space(p.table).unwrap();
    let directory: &mut PageDirectory =
        unsafe { machine.phys_to_mut(space.directory_frame().base()) };
    let last = directory.get(DirectoryIndex::new(u16::try_from(SELF_MAP_INDEX).unwrap()));
    assert_eq!(last.present_frame(), Some(space.directory_frame()));
}

#[test]
fn first_touch_takes_one_table_and_one_frame() {
    let machine = SimMachine::new(RAM);
    let mut p = process(&machine);
    let va = p.memory.vm_allocate(p.heap, PAGE_SIZE).unwrap();
    let before = p.process_free();

    let code = machine.write_u32(va, 0xC0FFEE).unwrap_err();
    let resolution = p.memory.handle_fault(va, code).unwrap();
    assert!(resolution.table_frame.is_some());
    assert!(resolution.data_frame.is_some());
    assert_eq!(p.process_free(), before - 2);

    machine.write_u32(va, 0xC0FFEE).unwrap();
    assert_eq!(machine.read_u32(va), Ok(0xC0FFEE));
    assert_eq!(p.process_free(), before - 2);
}

#[test]
fn second_page_in_the_same_table_takes_only_a_frame() {
    let machine = SimMachine::new(RAM);
    let mut p = process(&machine);
    let va = p.memory.vm_allocate(p.heap, 2 * PAGE_SIZE).unwrap();
    for page in [va, va + PAGE_SIZE] {
        let code = machine.read_u32(page).unwrap_err();
        p.memory.handle_fault(page, code).unwrap();
    }
    let again = p.memory.handle_fault(va, kernel_vmem::PageFaultError::new());
    assert!(again.unwrap().is_spurious());
}

#[test]
fn illegitimate_fault_consumes_nothing() {
    let machine = SimMachine::new(RAM);
    let mut p = process(&machine);
    let allocated = p.memory.vm_allocate(p.heap, PAGE_SIZE).unwrap();
    let before = p.process_free();
    let regions = p.memory.vm_pool(p.heap).unwrap().clone();

    let stray = VirtualAddress::new(0x6000_0000);
    let code = machine.read_u32(stray).unwrap_err();
    assert_eq!(
        p.memory.handle_fault(stray, code),
        Err(FaultError::IllegitimateAccess { address: stray })
    );
    // Bookkeeping pages of the pool are not legitimate either.
    assert!(matches!(
        p.memory.handle_fault(VirtualAddress::new(HEAP_BASE), code),
        Err(FaultError::IllegitimateAccess { .. })
    ));

    assert_eq!(p.process_free(), before);
    let after = p.memory.vm_pool(p.heap).unwrap();
    assert_eq!(after.allocated_regions(), regions.allocated_regions());
    assert_eq!(after.free_regions(), regions.free_regions());
    assert!(p.memory.is_legitimate(p.heap, allocated));
}

#[test]
fn release_returns_frames_and_revokes_legitimacy() {
    let machine = SimMachine::new(RAM);
    let mut p = process(&machine);
    let free_pages = p.memory.vm_pool(p.heap).unwrap().free_pages();
    let va = p.memory.vm_allocate(p.heap, 4 * PAGE_SIZE).unwrap();

    let code = machine.write_u32(va + PAGE_SIZE, 1).unwrap_err();
    p.memory.handle_fault(va + PAGE_SIZE, code).unwrap();
    let backed = p.process_free();

    p.memory.vm_release(p.heap, va).unwrap();
    assert_eq!(p.process_free(), backed + 1);
    assert!(!p.memory.is_legitimate(p.heap, va + PAGE_SIZE));
    assert!(p.memory.vm_pool(p.heap).unwrap().free_pages() >= free_pages);

    let code = machine.read_u32(va + PAGE_SIZE).unwrap_err();
    assert_eq!(
        p.memory.handle_fault(va + PAGE_SIZE, code),
        Err(FaultError::IllegitimateAccess {
            address: va + PAGE_SIZE
        })
    );
    assert_eq!(
        p.memory.vm_release(p.heap, va),
        Err(VmPoolError::NotAllocated { address: va })
    );
}

#[test]
fn translate_sees_demand_mapped_pages() {
    let machine = SimMachine::new(RAM);
    let mut p = process(&machine);
    let va = p.memory.vm_allocate(p.heap, PAGE_SIZE).unwrap() + 0x24;
    assert_eq!(p.memory.translate(p.table, va), Ok(None));

    let code = machine.read_u32(va).unwrap_err();
    let frame = p.memory.handle_fault(va, code).unwrap().data_frame.unwrap();
    assert_eq!(p.memory.translate(p.table, va), Ok(Some(frame.base() + 0x24)));
    // Shared region is identity-mapped.
    assert_eq!(
        p.memory.translate(p.table, VirtualAddress::new(0x0020_1000)),
        Ok(Some(kernel_vmem::PhysicalAddress::new(0x0020_1000)))
    );
}

#[test]
fn trap_entry_services_through_cr2() {
    let machine = SimMachine::new(RAM);
    let mut p = process(&machine);
    let va = p.memory.vm_allocate(p.heap, PAGE_SIZE).unwrap();
    let shared = SharedMemory::new(p.memory);

    let code = machine.write_u32(va, 9).unwrap_err();
    let resolution = page_fault_trap(&shared, code);
    assert!(resolution.data_frame.is_some());
    machine.write_u32(va, 9).unwrap();
    assert!(shared.with(|m| m.is_legitimate(p.heap, va)));
}

#[test]
fn processes_keep_their_own_heaps() {
    let machine = SimMachine::new(RAM);
    let mut memory = MemoryContext::new(&machine);
    let pools = unsafe { bootstrap(&mut memory, &MemoryLayout::STANDARD) }.unwrap();
    let a = memory.create_address_space(TableLayout::SelfMapped).unwrap();
    let b = memory.create_address_space(TableLayout::SelfMapped).unwrap();
    let base = VirtualAddress::new(HEAP_BASE);
    let heap_a = memory.create_vm_pool(a, base, HEAP_SIZE, pools.process).unwrap();
    let heap_b = memory.create_vm_pool(b, base, HEAP_SIZE, pools.process).unwrap();
    memory.load(a).unwrap();
    memory.enable_paging().unwrap();

    let va = memory.vm_allocate(heap_b, PAGE_SIZE).unwrap();
    let code = machine.read_u32(va).unwrap_err();
    assert!(matches!(
        memory.handle_fault(va, code),
        Err(FaultError::IllegitimateAccess { .. })
    ));

    let va_a = memory.vm_allocate(heap_a, PAGE_SIZE).unwrap();
    assert_eq!(va_a, va);
    let code = machine.write_u32(va_a, 3).unwrap_err();
    memory.handle_fault(va_a, code).unwrap();
    machine.write_u32(va_a, 3).unwrap();

    memory.load(b).unwrap();
    assert!(machine.read_u32(va).is_err());
    let code = machine.read_u32(va).unwrap_err();
    memory.handle_fault(va, code).unwrap();
    assert_eq!(machine.read_u32(va), Ok(0));

    memory.load(a).unwrap();
    assert_eq!(machine.read_u32(va_a), Ok(3));
}
