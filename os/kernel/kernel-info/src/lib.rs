//! # Kernel Memory Configuration
//!
//! Compile-time description of where physical memory lives and how the
//! virtual-memory core carves it up. Everything is a `const`, checked by
//! `const` assertions, and bundled into [`memory::MemoryLayout::STANDARD`]
//! for the boot path.
//!
//! ## Physical Memory Layout (32 MiB machine)
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Low memory + kernel image      │
//! 0x0020_0000 ├─────────────────────────────────┤ KERNEL_POOL_START_FRAME (2 MiB)
//!             │  Kernel frame pool (2 MiB)      │ page directories/tables,
//!             │                                 │ pool bitmaps
//! 0x0040_0000 ├─────────────────────────────────┤ PROCESS_POOL_START_FRAME (4 MiB)
//!             │  Process frame pool (28 MiB)    │ demand-paged data frames
//! 0x00F0_0000 │  ├ memory hole (1 MiB) ┤        │ MEMORY_HOLE_START_FRAME (15 MiB)
//!             │                                 │
//! 0x0200_0000 └─────────────────────────────────┘
//! ```
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Shared region (identity, 4 MiB)│ SHARED_SIZE
//! 0x0040_0000 ├─────────────────────────────────┤
//!             │  Demand-paged process memory    │
//! 0xFFC0_0000 ├─────────────────────────────────┤ TABLE_WINDOW_BASE
//!             │  Page tables via self-map       │ table d at base | d << 12
//! 0xFFFF_F000 ├─────────────────────────────────┤ DIRECTORY_WINDOW
//!             │  Page directory via self-map    │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
