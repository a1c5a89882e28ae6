//! # Contiguous Frame Pool
//!
//! A first-fit allocator for runs of physical frames. State lives in a
//! packed bitmap of two bits per frame, four frames per byte:
//!
//! ```text
//! byte i/4:  | f+3 | f+2 | f+1 |  f  |
//!            | 7 6 | 5 4 | 3 2 | 1 0 |
//!
//! 00 Free   01 Used   10 Head   (11 decodes as Used)
//! ```
//!
//! Every allocated run is one `Head` frame followed by zero or more `Used`
//! frames, so releasing only needs the first frame number.
//!
//! The bitmap occupies [`ContFramePool::needed_info_frames`] frames. A pool
//! constructed without a metadata frame carves them from the front of its own
//! range.

use core::fmt;
use kernel_info::memory::FrameRange;
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE};
use kernel_vmem::PhysMapper;
use log::debug;

/// Frames whose state fits into one metadata frame.
const FRAMES_PER_INFO_FRAME: u32 = PAGE_SIZE * 8 / 2;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameState {
    Free,
    Used,
    /// First frame of an allocated run.
    Head,
}

impl FrameState {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Free,
            0b10 => Self::Head,
            _ => Self::Used,
        }
    }

    const fn into_bits(self) -> u8 {
        match self {
            Self::Free => 0b00,
            Self::Used => 0b01,
            Self::Head => 0b10,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FramePoolError {
    #[error("no run of {requested} free frames")]
    OutOfFrames { requested: u32 },
    #[error("frame {frame} is not the head of an allocated run")]
    InvalidRelease { frame: FrameNumber },
    #[error("frames [{base}, +{frames}) are not inside the pool")]
    RangeOutOfBounds { base: FrameNumber, frames: u32 },
    #[error("requested zero frames")]
    EmptyRequest,
    #[error("a pool of {frames} frames cannot hold its own {needed} metadata frame(s)")]
    MetadataDoesNotFit { frames: u32, needed: u32 },
    #[error("frames [{base}, +{frames}) overlap a registered pool")]
    Overlap { base: FrameNumber, frames: u32 },
    #[error("the frame pool registry is full")]
    RegistryFull,
    #[error("no frame pool is registered under that id")]
    UnknownPool,
}

/// Packed two-bit frame states, addressed by pool-local frame index.
pub struct FrameBitmap<'a> {
    bytes: &'a mut [u8],
}

impl<'a> FrameBitmap<'a> {
    /// Wrap `bytes` and mark every frame free.
    #[must_use]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        bytes.fill(0);
        Self { bytes }
    }

    /// Bytes needed to track `frames` frames.
    #[must_use]
    pub const fn bytes_for(frames: u32) -> usize {
        frames.div_ceil(4) as usize
    }

    /// Number of frames this bitmap can describe.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn capacity(&self) -> u32 {
        (self.bytes.len() * 4) as u32
    }

    /// # Panics
    /// If `index` is beyond [`capacity`](Self::capacity).
    #[must_use]
    pub fn get(&self, index: u32) -> FrameState {
        let (byte, shift) = Self::locate(index);
        FrameState::from_bits(self.bytes[byte] >> shift)
    }

    /// # Panics
    /// If `index` is beyond [`capacity`](Self::capacity).
    pub fn set(&mut self, index: u32, state: FrameState) {
        let (byte, shift) = Self::locate(index);
        let b = &mut self.bytes[byte];
        *b = (*b & !(0b11 << shift)) | (state.into_bits() << shift);
    }

    const fn locate(index: u32) -> (usize, u32) {
        ((index / 4) as usize, (index % 4) * 2)
    }
}

/// Allocator for contiguous runs of frames in `[base, base + frames)`.
pub struct ContFramePool<'a> {
    range: FrameRange,
    metadata: FrameNumber,
    self_hosted: bool,
    bitmap: FrameBitmap<'a>,
}

impl<'a> ContFramePool<'a> {
    /// Set up a pool over `frames` frames starting at `base`.
    ///
    /// With `metadata == None` the bitmap is placed in the first
    /// [`needed_info_frames`](Self::needed_info_frames) frames of the pool,
    /// which are then allocated as one run. Otherwise the bitmap is written
    /// to the frames starting at `metadata`, which the caller has set aside.
    ///
    /// # Safety
    /// The metadata frames must be reachable through `mapper` for `'a` and
    /// must not be used for anything else while the pool lives.
    ///
    /// # Errors
    /// - [`FramePoolError::EmptyRequest`] for a zero-sized pool.
    /// - [`FramePoolError::RangeOutOfBounds`] if the range leaves the 4 GiB
    ///   physical space.
    /// - [`FramePoolError::MetadataDoesNotFit`] if a self-hosted pool is
    ///   smaller than its own bitmap.
    pub unsafe fn new<M: PhysMapper>(
        mapper: &'a M,
        base: FrameNumber,
        frames: u32,
        metadata: Option<FrameNumber>,
    ) -> Result<Self, FramePoolError> {
        if frames == 0 {
            return Err(FramePoolError::EmptyRequest);
        }
        if base.as_u32().checked_add(frames).is_none_or(|end| end > 1 << 20) {
            return Err(FramePoolError::RangeOutOfBounds { base, frames });
        }

        let needed = Self::needed_info_frames(frames);
        if metadata.is_none() && needed > frames {
            return Err(FramePoolError::MetadataDoesNotFit { frames, needed });
        }

        let info = metadata.unwrap_or(base);
        // SAFETY: the caller guarantees the metadata frames are reachable and
        // exclusively ours; `needed` frames hold at least `bytes_for(frames)`.
        let bytes = unsafe {
            let first: &'a mut u8 = mapper.phys_to_mut(info.base());
            core::slice::from_raw_parts_mut(core::ptr::from_mut(first), FrameBitmap::bytes_for(frames))
        };

        let mut pool = Self {
            range: FrameRange { base, frames },
            metadata: info,
            self_hosted: metadata.is_none(),
            bitmap: FrameBitmap::new(bytes),
        };
        if pool.self_hosted {
            pool.mark_run(0, needed);
        }

        debug!(
            "frame pool [{base}, +{frames}): metadata at {info} ({needed} frame(s){})",
            if pool.self_hosted { ", self-hosted" } else { "" }
        );
        Ok(pool)
    }

    /// Frames needed to hold the bitmap of a pool of `frames` frames.
    ///
    /// ```rust
    /// # use kernel_alloc::frame_pool::ContFramePool;
    /// assert_eq!(ContFramePool::needed_info_frames(512), 1);
    /// assert_eq!(ContFramePool::needed_info_frames(16_384), 1);
    /// assert_eq!(ContFramePool::needed_info_frames(16_385), 2);
    /// ```
    #[must_use]
    pub const fn needed_info_frames(frames: u32) -> u32 {
        frames.div_ceil(FRAMES_PER_INFO_FRAME)
    }

    /// Allocate `n` consecutive frames, first fit.
    ///
    /// # Errors
    /// [`FramePoolError::EmptyRequest`] for `n == 0`,
    /// [`FramePoolError::OutOfFrames`] if no free run is long enough.
    pub fn get_frames(&mut self, n: u32) -> Result<FrameNumber, FramePoolError> {
        if n == 0 {
            return Err(FramePoolError::EmptyRequest);
        }

        let total = self.range.frames;
        let mut start = 0;
        while n <= total - start {
            let mut cursor = start;
            while cursor < start + n && self.bitmap.get(cursor) == FrameState::Free {
                cursor += 1;
            }
            if cursor == start + n {
                self.mark_run(start, n);
                return Ok(self.range.base + start);
            }
            start = cursor + 1;
        }
        Err(FramePoolError::OutOfFrames { requested: n })
    }

    /// Mark `[base, base + n)` as one allocated run, whatever its state.
    ///
    /// # Errors
    /// [`FramePoolError::RangeOutOfBounds`] if the range is not wholly inside
    /// the pool; nothing changes then.
    pub fn mark_inaccessible(&mut self, base: FrameNumber, n: u32) -> Result<(), FramePoolError> {
        if n == 0 {
            return Err(FramePoolError::EmptyRequest);
        }
        let first = base
            .offset_from(self.range.base)
            .filter(|&first| first.checked_add(n).is_some_and(|end| end <= self.range.frames))
            .ok_or(FramePoolError::RangeOutOfBounds { base, frames: n })?;
        self.mark_run(first, n);
        debug!("marked frames [{base}, +{n}) inaccessible");
        Ok(())
    }

    /// Free the run starting at `frame`; returns how many frames were freed.
    ///
    /// # Errors
    /// [`FramePoolError::InvalidRelease`] if `frame` is outside the pool, is
    /// not a run head, or heads the pool's own bitmap. Nothing changes then.
    pub fn release(&mut self, frame: FrameNumber) -> Result<u32, FramePoolError> {
        let index = frame
            .offset_from(self.range.base)
            .filter(|&i| i < self.range.frames)
            .ok_or(FramePoolError::InvalidRelease { frame })?;
        if self.bitmap.get(index) != FrameState::Head || (self.self_hosted && index == 0) {
            return Err(FramePoolError::InvalidRelease { frame });
        }

        self.bitmap.set(index, FrameState::Free);
        let mut released = 1;
        let mut next = index + 1;
        while next < self.range.frames && self.bitmap.get(next) == FrameState::Used {
            self.bitmap.set(next, FrameState::Free);
            released += 1;
            next += 1;
        }
        Ok(released)
    }

    fn mark_run(&mut self, first: u32, n: u32) {
        self.bitmap.set(first, FrameState::Head);
        for i in first + 1..first + n {
            self.bitmap.set(i, FrameState::Used);
        }
    }

    #[must_use]
    pub const fn range(&self) -> FrameRange {
        self.range
    }

    #[must_use]
    pub const fn base(&self) -> FrameNumber {
        self.range.base
    }

    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.range.frames
    }

    /// First frame of the bitmap.
    #[must_use]
    pub const fn metadata(&self) -> FrameNumber {
        self.metadata
    }

    #[must_use]
    pub const fn is_self_hosted(&self) -> bool {
        self.self_hosted
    }

    #[must_use]
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        self.range.contains(frame)
    }

    /// State of `frame`, or `None` if the pool does not own it.
    #[must_use]
    pub fn state(&self, frame: FrameNumber) -> Option<FrameState> {
        let index = frame.offset_from(self.range.base)?;
        (index < self.range.frames).then(|| self.bitmap.get(index))
    }

    /// Number of frames currently free.
    #[must_use]
    pub fn free_frames(&self) -> u32 {
        let free = (0..self.range.frames)
            .filter(|&i| self.bitmap.get(i) == FrameState::Free)
            .count();
        u32::try_from(free).unwrap_or(u32::MAX)
    }
}

impl fmt::Debug for ContFramePool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContFramePool")
            .field("base", &self.range.base)
            .field("frames", &self.range.frames)
            .field("metadata", &self.metadata)
            .field("free", &self.free_frames())
            .finish()
    }
}
