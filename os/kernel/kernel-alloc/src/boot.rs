//! Boot-time bring-up of the standard two-pool setup.

use crate::context::{MemoryContext, PagingError};
use crate::frame_pool::{ContFramePool, FramePoolError};
use crate::registry::PoolId;
use kernel_info::memory::MemoryLayout;
use kernel_qemu::QemuLogger;
use kernel_vmem::Mmu;
use log::{LevelFilter, SetLoggerError, info};

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);

/// Route the `log` macros to QEMU's debug console.
///
/// # Errors
/// Fails if a logger is already installed.
pub fn init_logging() -> Result<(), SetLoggerError> {
    LOGGER.init()
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Frames(#[from] FramePoolError),
    #[error(transparent)]
    Paging(#[from] PagingError),
}

/// Pools created by [`bootstrap`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BootPools {
    pub kernel: PoolId,
    pub process: PoolId,
}

/// Register the kernel and process pools described by `layout` and
/// initialize paging.
///
/// The kernel pool hosts its own bitmap. The process pool's bitmap is taken
/// from the kernel pool so that it stays reachable once paging is on. The
/// memory hole, if any, is marked inaccessible in the process pool.
///
/// # Safety
/// Both pool ranges must be real RAM reachable through the context's MMU,
/// and the kernel pool must lie inside the shared identity-mapped region.
///
/// # Errors
/// Any frame pool or paging error on the way; the context is then only
/// partially set up.
pub unsafe fn bootstrap<M: Mmu>(
    context: &mut MemoryContext<'_, M>,
    layout: &MemoryLayout,
) -> Result<BootPools, BootError> {
    let kernel_range = layout.kernel_pool;
    let process_range = layout.process_pool;

    // SAFETY: forwarded to the caller.
    let kernel = unsafe { context.add_frame_pool(kernel_range.base, kernel_range.frames, None) }?;

    let info_frames = ContFramePool::needed_info_frames(process_range.frames);
    let info = context.frames_mut().get_frames(kernel, info_frames)?;
    // SAFETY: `info` was just taken from the kernel pool.
    let process = unsafe {
        context.add_frame_pool(process_range.base, process_range.frames, Some(info))
    }?;

    if let Some(hole) = layout.memory_hole {
        context
            .frames_mut()
            .get_mut(process)
            .ok_or(FramePoolError::UnknownPool)?
            .mark_inaccessible(hole.base, hole.frames)?;
    }

    context.init_paging(kernel, process, layout.shared_size)?;
    info!(
        "memory core up: kernel pool [{}, +{}), process pool [{}, +{}), {} free frames",
        kernel_range.base,
        kernel_range.frames,
        process_range.base,
        process_range.frames,
        context.frames().free_frames()
    );
    Ok(BootPools { kernel, process })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_pool::FrameState;
    use kernel_info::memory::{MEMORY_HOLE_FRAMES, MEMORY_HOLE_START_FRAME};
    use kernel_memory_addresses::FrameNumber;
    use kernel_vmem::testing::SimMachine;

    #[test]
    fn logging_is_installed_once() {
        init_logging().unwrap();
        assert_eq!(log::max_level(), LevelFilter::Debug);
        assert!(init_logging().is_err());
    }

    #[test]
    fn standard_layout() {
        let machine = SimMachine::new(32 * 1024 * 1024);
        let mut context = MemoryContext::new(&machine);
        let pools = unsafe { bootstrap(&mut context, &MemoryLayout::STANDARD) }.unwrap();

        let kernel = context.frames().get(pools.kernel).unwrap();
        assert!(kernel.is_self_hosted());
        // One frame for its own bitmap and one for the process pool's.
        assert_eq!(kernel.free_frames(), 510);

        let process = context.frames().get(pools.process).unwrap();
        assert_eq!(process.metadata(), FrameNumber::new(513));
        assert_eq!(
            process.state(FrameNumber::new(MEMORY_HOLE_START_FRAME)),
            Some(FrameState::Head)
        );
        assert_eq!(process.free_frames(), 7168 - MEMORY_HOLE_FRAMES);

        let config = context.config().unwrap();
        assert_eq!(config.shared_size, 4 * 1024 * 1024);
        assert_eq!(
            unsafe { bootstrap(&mut context, &MemoryLayout::STANDARD) },
            Err(BootError::Frames(FramePoolError::Overlap {
                base: FrameNumber::new(512),
                frames: 512
            }))
        );
    }
}
