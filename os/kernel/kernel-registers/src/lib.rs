//! # Typed i386 Control Registers
//!
//! Bit-exact models of the control registers the paging code touches:
//!
//! - [`cr0::Cr0`]: the paging-enable switch lives in bit 31.
//! - [`cr2::Cr2`]: the linear address of the most recent page fault.
//! - [`cr3::Cr3`]: the physical base of the active page directory.
//!
//! The raw `mov` instructions are only compiled with the `asm` feature on a
//! 32-bit x86 target. Everywhere else the types are plain values, which is
//! what the simulated machine in `kernel-vmem` builds on.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
