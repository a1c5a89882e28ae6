//! # Memory Layout

use kernel_memory_addresses::{BYTES_PER_TABLE, FrameNumber, PAGE_SIZE, VirtualAddress};

/// First frame of the kernel pool (2 MiB).
pub const KERNEL_POOL_START_FRAME: u32 = 512;

/// Size of the kernel pool in frames (2 MiB).
pub const KERNEL_POOL_FRAMES: u32 = 512;

/// First frame of the process pool (4 MiB).
pub const PROCESS_POOL_START_FRAME: u32 = 1024;

/// Size of the process pool in frames (28 MiB).
pub const PROCESS_POOL_FRAMES: u32 = 7168;

/// First frame of the 1 MiB hole at 15 MiB that must never be handed out.
pub const MEMORY_HOLE_START_FRAME: u32 = 3840;

/// Size of the memory hole in frames.
pub const MEMORY_HOLE_FRAMES: u32 = 256;

/// Bytes of low memory that every address space identity-maps.
pub const SHARED_SIZE: u32 = 4 * 1024 * 1024;

/// Directory slot holding the self-reference in a self-mapped address space.
pub const SELF_MAP_INDEX: usize = 1023;

/// Where the directory itself appears once the self-map is active.
pub const DIRECTORY_WINDOW: u32 = 0xFFFF_F000;

/// Base of the 4 MiB window through which page tables appear.
pub const TABLE_WINDOW_BASE: u32 = 0xFFC0_0000;

/// Capacity of the frame pool registry.
pub const MAX_FRAME_POOLS: usize = 8;

/// Capacity of the address-space arena.
pub const MAX_ADDRESS_SPACES: usize = 8;

/// Capacity of the VM pool arena, and of the per-address-space pool list.
pub const MAX_VM_POOLS: usize = 8;

#[allow(clippy::cast_possible_truncation)]
const _: () = {
    assert!(KERNEL_POOL_START_FRAME + KERNEL_POOL_FRAMES <= PROCESS_POOL_START_FRAME);
    assert!(MEMORY_HOLE_START_FRAME >= PROCESS_POOL_START_FRAME);
    assert!(
        MEMORY_HOLE_START_FRAME + MEMORY_HOLE_FRAMES
            <= PROCESS_POOL_START_FRAME + PROCESS_POOL_FRAMES
    );
    assert!(SHARED_SIZE.is_multiple_of(PAGE_SIZE));
    // The kernel pool must sit inside the shared identity map so page tables
    // stay reachable by physical address after paging is enabled.
    assert!((KERNEL_POOL_START_FRAME + KERNEL_POOL_FRAMES) * PAGE_SIZE <= SHARED_SIZE);
    assert!(TABLE_WINDOW_BASE == (SELF_MAP_INDEX as u32) * BYTES_PER_TABLE);
    assert!(DIRECTORY_WINDOW == TABLE_WINDOW_BASE | ((SELF_MAP_INDEX as u32) << 12));
};

/// A contiguous run of physical frames.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameRange {
    pub base: FrameNumber,
    pub frames: u32,
}

impl FrameRange {
    #[must_use]
    pub const fn new(base: u32, frames: u32) -> Self {
        Self {
            base: FrameNumber::new(base),
            frames,
        }
    }

    /// One past the last frame.
    #[must_use]
    pub const fn end(&self) -> FrameNumber {
        FrameNumber::new(self.base.as_u32() + self.frames)
    }

    #[must_use]
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        frame.as_u32() >= self.base.as_u32() && frame.as_u32() < self.end().as_u32()
    }

    /// Whether the two ranges share at least one frame.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.base.as_u32() < other.end().as_u32() && other.base.as_u32() < self.end().as_u32()
    }
}

/// Everything the boot path needs to bring up the memory core.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryLayout {
    /// Self-hosted pool for directories, tables and pool bitmaps.
    pub kernel_pool: FrameRange,
    /// Pool for demand-paged data frames; its bitmap lives in the kernel pool.
    pub process_pool: FrameRange,
    /// Frames inside the process pool that must be marked inaccessible.
    pub memory_hole: Option<FrameRange>,
    /// Identity-mapped bytes at the bottom of every address space.
    pub shared_size: u32,
}

impl MemoryLayout {
    /// The standard 32 MiB machine.
    pub const STANDARD: Self = Self {
        kernel_pool: FrameRange::new(KERNEL_POOL_START_FRAME, KERNEL_POOL_FRAMES),
        process_pool: FrameRange::new(PROCESS_POOL_START_FRAME, PROCESS_POOL_FRAMES),
        memory_hole: Some(FrameRange::new(MEMORY_HOLE_START_FRAME, MEMORY_HOLE_FRAMES)),
        shared_size: SHARED_SIZE,
    };

    /// Highest physical byte (exclusive) any pool in this layout touches.
    #[must_use]
    pub const fn physical_end(&self) -> u32 {
        let k = self.kernel_pool.end().as_u32();
        let p = self.process_pool.end().as_u32();
        (if k > p { k } else { p }) * PAGE_SIZE
    }
}

/// Virtual address at which page table `directory_index` is visible through
/// the self-map.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn table_window(directory_index: usize) -> VirtualAddress {
    VirtualAddress::new(TABLE_WINDOW_BASE | ((directory_index as u32) << 12))
}
