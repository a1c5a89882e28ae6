//! # Kernel Memory Allocation and Demand Paging
//!
//! Physical frame allocation, per-process virtual region allocation and the
//! page-fault path that ties them together.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              VM Pools ([`vm_pool`])                 │
//! │    • Page-aligned region allocation                 │
//! │    • Address legitimacy for the fault handler       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ is_legitimate / free_page
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Memory Context ([`context`])               │
//! │    • Address spaces (flat or self-mapped)           │
//! │    • Current table, paging state                    │
//! │    • Demand-paging fault handler                    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ get_frames / release_frames
//! ┌─────────────────▼───────────────────────────────────┐
//! │    Frame Pools ([`frame_pool`], [`registry`])       │
//! │    • Contiguous runs, 2-bit state per frame         │
//! │    • Release by frame number alone                  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Allocating from a VM pool only reserves addresses. The first access to a
//! page faults; [`page_fault_trap`] asks the address space's VM pools whether
//! the address is legitimate and then takes a table frame and a data frame
//! from the frame pools.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{MemoryContext, bootstrap};
//! use kernel_info::memory::MemoryLayout;
//! use kernel_vmem::{PAGE_SIZE, TableLayout, VirtualAddress};
//! use kernel_vmem::testing::SimMachine;
//!
//! let machine = SimMachine::new(32 * 1024 * 1024);
//! let mut memory = MemoryContext::new(&machine);
//! let pools = unsafe { bootstrap(&mut memory, &MemoryLayout::STANDARD) }.unwrap();
//!
//! let table = memory.create_address_space(TableLayout::SelfMapped).unwrap();
//! let heap = memory
//!     .create_vm_pool(table, VirtualAddress::new(0x4000_0000), 0x10_0000, pools.process)
//!     .unwrap();
//! memory.load(table).unwrap();
//! memory.enable_paging().unwrap();
//!
//! let va = memory.vm_allocate(heap, PAGE_SIZE).unwrap();
//! let code = machine.write_u32(va, 1).unwrap_err();
//! memory.handle_fault(va, code).unwrap();
//! machine.write_u32(va, 1).unwrap();
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod boot;
pub mod context;
pub mod frame_pool;
pub mod registry;
pub mod shared;
pub mod vm_pool;

pub use boot::{BootError, BootPools, bootstrap, init_logging};
pub use context::{MemoryContext, PagingConfig, PagingError, PagingState, TableId, VmPoolId};
pub use frame_pool::{ContFramePool, FrameBitmap, FramePoolError, FrameState};
pub use registry::{FramePoolRegistry, PoolId};
pub use shared::{SharedMemory, page_fault_trap};
pub use vm_pool::{PageReclaimer, Region, RegionArray, VmPool, VmPoolError};
