//! # Page faults
//!
//! The error code the CPU pushes for vector 14, the outcome of servicing a
//! fault, and the ways servicing can fail.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Page-fault error code layout (i386).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §4.7 "Page-Fault Exceptions".
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read access.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    /// Only translation misses are ever serviced on demand.
    #[inline]
    #[must_use]
    pub const fn is_not_present(&self) -> bool {
        !self.present()
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            if self.write() {
                "Write to non-present page"
            } else {
                "Read from non-present page"
            }
        } else if self.reserved_bit() {
            "Reserved bit set in a paging structure"
        } else if self.instruction_fetch() {
            "Instruction fetch from protected page"
        } else if self.write() {
            if self.user() {
                "User-mode write to protected page"
            } else {
                "Kernel write to protected page"
            }
        } else {
            "Read access to protected page"
        }
    }
}

/// What the fault handler had to allocate.
///
/// Both fields `None` means the fault was spurious: the page was already
/// mapped when the handler ran.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FaultResolution {
    /// Fresh page-table frame installed in the directory.
    pub table_frame: Option<FrameNumber>,
    /// Fresh data frame installed in the page table.
    pub data_frame: Option<FrameNumber>,
}

impl FaultResolution {
    #[must_use]
    pub const fn is_spurious(&self) -> bool {
        self.table_frame.is_none() && self.data_frame.is_none()
    }
}

/// Why a page fault could not be serviced. Every variant is fatal for the
/// faulting context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("protection fault at {address} (error code {code:#x})")]
    ProtectionFault { address: VirtualAddress, code: u32 },
    #[error("access to {address} lies outside every allocated region")]
    IllegitimateAccess { address: VirtualAddress },
    #[error("no frame left to back {address}")]
    OutOfFrames { address: VirtualAddress },
    #[error("page fault raised inside the memory core")]
    ReentrantFault,
    #[error("page fault with no page table loaded")]
    NoActiveTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_bits() {
        let code = PageFaultError::from_bits(0b0110);
        assert!(code.is_not_present());
        assert!(code.write());
        assert!(code.user());
        assert_eq!(code.explain(), "Write to non-present page");

        let prot = PageFaultError::new().with_present(true).with_write(true);
        assert!(!prot.is_not_present());
        assert_eq!(prot.explain(), "Kernel write to protected page");
    }
}
