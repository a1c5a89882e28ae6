//! Registry mapping raw frame numbers back to the pool that owns them.
//!
//! Releasing frames carries no pool reference, so every pool is created
//! through the registry and [`FramePoolRegistry::release_frames`] looks the
//! owner up by range. Registered ranges never overlap.

use crate::frame_pool::{ContFramePool, FramePoolError};
use kernel_info::memory::{FrameRange, MAX_FRAME_POOLS};
use kernel_memory_addresses::FrameNumber;
use kernel_vmem::PhysMapper;
use log::warn;

/// Handle of a registered frame pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PoolId(usize);

impl PoolId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

pub struct FramePoolRegistry<'a> {
    pools: [Option<ContFramePool<'a>>; MAX_FRAME_POOLS],
}

impl Default for FramePoolRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> FramePoolRegistry<'a> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pools: [const { None }; MAX_FRAME_POOLS],
        }
    }

    /// Construct a pool and register it.
    ///
    /// Overlap and capacity are checked before the pool writes its bitmap.
    ///
    /// # Safety
    /// As for [`ContFramePool::new`].
    ///
    /// # Errors
    /// [`FramePoolError::Overlap`] or [`FramePoolError::RegistryFull`], or any
    /// error of [`ContFramePool::new`].
    pub unsafe fn create<M: PhysMapper>(
        &mut self,
        mapper: &'a M,
        base: FrameNumber,
        frames: u32,
        metadata: Option<FrameNumber>,
    ) -> Result<PoolId, FramePoolError> {
        let range = FrameRange { base, frames };
        if base.as_u32().checked_add(frames).is_none() {
            return Err(FramePoolError::RangeOutOfBounds { base, frames });
        }
        if self.pools().any(|(_, p)| p.range().overlaps(&range)) {
            return Err(FramePoolError::Overlap { base, frames });
        }
        let slot = self
            .pools
            .iter()
            .position(Option::is_none)
            .ok_or(FramePoolError::RegistryFull)?;

        // SAFETY: forwarded to the caller.
        let pool = unsafe { ContFramePool::new(mapper, base, frames, metadata) }?;
        self.pools[slot] = Some(pool);
        Ok(PoolId(slot))
    }

    #[must_use]
    pub fn get(&self, id: PoolId) -> Option<&ContFramePool<'a>> {
        self.pools.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: PoolId) -> Option<&mut ContFramePool<'a>> {
        self.pools.get_mut(id.0)?.as_mut()
    }

    /// Allocate `n` frames from pool `id`.
    ///
    /// # Errors
    /// [`FramePoolError::UnknownPool`], or what the pool reports.
    pub fn get_frames(&mut self, id: PoolId, n: u32) -> Result<FrameNumber, FramePoolError> {
        self.get_mut(id)
            .ok_or(FramePoolError::UnknownPool)?
            .get_frames(n)
    }

    /// The pool whose range contains `frame`.
    #[must_use]
    pub fn owner_of(&self, frame: FrameNumber) -> Option<PoolId> {
        self.pools()
            .find(|(_, p)| p.contains(frame))
            .map(|(id, _)| id)
    }

    /// Free the run headed by `frame` in whichever pool owns it.
    ///
    /// # Errors
    /// [`FramePoolError::InvalidRelease`] if no pool owns `frame` or it is
    /// not a run head. No pool changes in that case.
    pub fn release_frames(&mut self, frame: FrameNumber) -> Result<u32, FramePoolError> {
        let result = match self.owner_of(frame).and_then(|id| self.get_mut(id)) {
            Some(pool) => pool.release(frame),
            None => Err(FramePoolError::InvalidRelease { frame }),
        };
        if let Err(e) = result {
            warn!("rejected frame release: {e}");
        }
        result
    }

    /// Free frames across all pools.
    #[must_use]
    pub fn free_frames(&self) -> u32 {
        self.pools().map(|(_, p)| p.free_frames()).sum()
    }

    /// Registered pools in registration order.
    pub fn pools(&self) -> impl Iterator<Item = (PoolId, &ContFramePool<'a>)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (PoolId(i), p)))
    }
}
