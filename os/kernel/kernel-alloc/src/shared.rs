//! Kernel-global access to the memory core and the page-fault trap entry.

use crate::context::MemoryContext;
use kernel_sync::{InterruptGuard, SpinLock};
use kernel_vmem::{FaultError, FaultResolution, Mmu, PageFaultError};
use log::error;

/// A [`MemoryContext`] behind a spin lock.
///
/// Every critical section runs with interrupts masked, so a timer interrupt
/// cannot preempt a half-finished table update. A page fault raised from
/// inside a critical section finds the lock taken and is fatal.
pub struct SharedMemory<'m, M: Mmu> {
    mmu: &'m M,
    context: SpinLock<MemoryContext<'m, M>>,
}

impl<'m, M: Mmu> SharedMemory<'m, M> {
    #[must_use]
    pub const fn new(context: MemoryContext<'m, M>) -> Self {
        Self {
            mmu: context.mmu(),
            context: SpinLock::new(context),
        }
    }

    /// Run `f` on the context with interrupts masked.
    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryContext<'m, M>) -> R) -> R {
        let _irq = InterruptGuard::new();
        self.context.with_lock(f)
    }

    /// Like [`with`](Self::with), but gives up if the context is locked.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut MemoryContext<'m, M>) -> R) -> Option<R> {
        let _irq = InterruptGuard::new();
        let mut context = self.context.try_lock()?;
        Some(f(&mut context))
    }

    pub fn into_inner(self) -> MemoryContext<'m, M> {
        self.context.into_inner()
    }
}

/// Page-fault exception handler.
///
/// Reads the faulting address from CR2 and services the fault against the
/// current address space. Anything but a successfully serviced not-present
/// fault is logged and halts the faulting context.
pub fn page_fault_trap<M: Mmu>(shared: &SharedMemory<'_, M>, code: PageFaultError) -> FaultResolution {
    let _irq = InterruptGuard::new();
    let mmu = shared.mmu;
    let address = mmu.cr2().fault_address();

    let result = match shared.context.try_lock() {
        Some(mut context) => context.handle_fault(address, code),
        None => Err(FaultError::ReentrantFault),
    };
    match result {
        Ok(resolution) => resolution,
        Err(e) => {
            error!("unrecoverable page fault at {address} ({}): {e}", code.explain());
            mmu.halt()
        }
    }
}
