//! # Kernel synchronization primitives
//!
//! The memory core runs on a single logical context, so the primitives here
//! are small: a test-and-test-and-set [`SpinLock`] that also serves as the
//! re-entrancy detector for the page-fault path, and an [`InterruptGuard`]
//! that keeps interrupt handlers out of a critical section.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::InterruptGuard;
pub use spin_lock::{SpinLock, SpinLockGuard};
