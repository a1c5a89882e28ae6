use crate::{PAGE_SHIFT, PhysicalAddress};
use core::fmt;
use core::ops::Add;

/// Absolute number of a 4 KiB physical frame.
///
/// Frame `n` spans the physical bytes `[n * 4096, (n + 1) * 4096)`. Frame
/// pools, page-table entries and the translation-base register all speak in
/// frame numbers rather than byte addresses.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(u32);

impl FrameNumber {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// First byte of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }

    /// Distance from `origin` in frames, or `None` if `self` lies below it.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, origin: Self) -> Option<u32> {
        self.0.checked_sub(origin.0)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#x})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u32> for FrameNumber {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl Add<u32> for FrameNumber {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_from_is_none_below_origin() {
        let origin = FrameNumber::new(512);
        assert_eq!(FrameNumber::new(520).offset_from(origin), Some(8));
        assert_eq!(FrameNumber::new(511).offset_from(origin), None);
    }
}
