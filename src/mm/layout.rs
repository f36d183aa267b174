//! Memory Layout - Paging Geometry and Physical Memory Bounds
//!
//! Describes the two-level i386-style translation structure and where the
//! frame pool lives in physical memory.
//!
//! ```text
//!  0          low_mem        buffer_end                 memory_end
//!  |  kernel   |  buffer cache  |        frame pool          |
//!  | reserved  |  (USED = 100)  |   (refcounted, 0 = free)   |
//! ```
//!
//! Frame 0 holds the page directory; frames `1..=k` hold the kernel
//! identity tables built at bootstrap. Everything below `low_mem` is
//! kernel owned and never reference counted.

use core::fmt;

use crate::error::LayoutError;

// ============================================================================
// Geometry
// ============================================================================

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;

/// Entries in one page table
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Entries in the page directory
pub const ENTRIES_PER_DIRECTORY: usize = 1024;

/// Virtual span covered by one directory entry (4MB)
pub const BLOCK_SIZE: u32 = (ENTRIES_PER_TABLE * PAGE_SIZE) as u32;

/// Shift from a linear address to its directory index
pub const BLOCK_SHIFT: u32 = 22;

/// Linear slot reserved for each task (64MB)
pub const TASK_SIZE: u32 = 0x0400_0000;

/// Task slots that fit in the 4GB linear space
pub const NR_TASKS: u32 = 64;

/// Leaf entries copied when duplicating the bootstrap range (640KB)
pub const BOOTSTRAP_COPY_ENTRIES: usize = 160;

/// Reference count marking a permanently used frame (buffer cache)
pub const USED: u16 = 100;

/// Default reserved kernel boundary (1MB)
pub const LOW_MEM: u32 = 0x0010_0000;

/// Largest physical memory the boot path will size (16MB)
pub const MAX_MEMORY: u32 = 16 * 1024 * 1024;

// ============================================================================
// Addresses
// ============================================================================

/// Physical byte address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PhysAddr(pub u32);

/// Linear (virtual) byte address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr(pub u32);

/// Physical frame number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u32);

impl PhysAddr {
    /// Frame containing this address
    pub const fn frame(self) -> FrameId {
        FrameId(self.0 >> PAGE_SHIFT)
    }

    /// Offset within the frame
    pub const fn page_offset(self) -> usize {
        self.0 as usize & (PAGE_SIZE - 1)
    }
}

impl VirtAddr {
    /// Index of the covering page-directory entry
    pub const fn dir_index(self) -> usize {
        (self.0 >> BLOCK_SHIFT) as usize
    }

    /// Index of the leaf entry within its page table
    pub const fn table_index(self) -> usize {
        ((self.0 >> PAGE_SHIFT) as usize) & (ENTRIES_PER_TABLE - 1)
    }

    /// Offset within the page
    pub const fn page_offset(self) -> usize {
        self.0 as usize & (PAGE_SIZE - 1)
    }

    /// Whether the address sits on a directory-entry boundary
    pub const fn is_block_aligned(self) -> bool {
        self.0 & (BLOCK_SIZE - 1) == 0
    }

    /// Round down to the page boundary
    pub const fn trunc_page(self) -> Self {
        Self(trunc_page(self.0))
    }
}

impl FrameId {
    /// First byte of the frame
    pub const fn addr(self) -> PhysAddr {
        PhysAddr(self.0 << PAGE_SHIFT)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {} ({})", self.0, self.addr())
    }
}

/// Round address down to page boundary
pub const fn trunc_page(addr: u32) -> u32 {
    addr & !(PAGE_SIZE as u32 - 1)
}

/// Round address up to page boundary
pub const fn round_page(addr: u32) -> u32 {
    (addr + PAGE_SIZE as u32 - 1) & !(PAGE_SIZE as u32 - 1)
}

/// Number of directory entries spanned by `size` bytes, rounded up
pub const fn blocks_spanned(size: u32) -> usize {
    ((size as u64 + BLOCK_SIZE as u64 - 1) >> BLOCK_SHIFT) as usize
}

/// Linear base address of task slot `nr`.
///
/// Valid slots are `0..NR_TASKS`; slot 0 is the kernel.
pub const fn task_base(nr: u32) -> VirtAddr {
    debug_assert!(nr < NR_TASKS, "task slot out of range");
    VirtAddr(nr.wrapping_mul(TASK_SIZE))
}

// ============================================================================
// Memory Layout
// ============================================================================

/// Physical memory bounds handed over by the boot path.
///
/// Only [`MemoryLayout::new`] (or a constructor built on it) produces one,
/// so every layout in use satisfies `low_mem <= buffer_end <= memory_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Reserved kernel boundary; frames below are never pooled
    low_mem: u32,
    /// End of the buffer-cache region; frames below start out USED
    buffer_end: u32,
    /// End of physical memory
    memory_end: u32,
}

impl MemoryLayout {
    /// Create a validated layout
    pub fn new(low_mem: u32, buffer_end: u32, memory_end: u32) -> Result<Self, LayoutError> {
        for addr in [low_mem, buffer_end, memory_end] {
            if addr & (PAGE_SIZE as u32 - 1) != 0 {
                return Err(LayoutError::Unaligned(addr));
            }
        }
        if low_mem > buffer_end || buffer_end > memory_end {
            return Err(LayoutError::Unordered {
                low_mem,
                buffer_end,
                memory_end,
            });
        }
        if memory_end as u64 > u32::MAX as u64 + 1 - BLOCK_SIZE as u64 {
            return Err(LayoutError::TooLarge(memory_end));
        }

        let layout = Self {
            low_mem,
            buffer_end,
            memory_end,
        };
        // Directory + identity tables must fit below the boundary, and the
        // bootstrap window must never reach a pooled frame.
        let reserved_frames = 1 + layout.kernel_tables();
        let needed = core::cmp::max(
            reserved_frames * PAGE_SIZE,
            BOOTSTRAP_COPY_ENTRIES * PAGE_SIZE,
        ) as u32;
        if low_mem < needed {
            return Err(LayoutError::LowMemTooSmall { low_mem, needed });
        }
        Ok(layout)
    }

    /// Size the layout from the BIOS extended-memory count (in KB)
    pub fn from_extended_memory(ext_mem_k: u32) -> Result<Self, LayoutError> {
        let mut memory_end = (1u32 << 20).saturating_add(ext_mem_k.saturating_mul(1024));
        memory_end &= 0xffff_f000;
        if memory_end > MAX_MEMORY {
            memory_end = MAX_MEMORY;
        }
        let buffer_end = if memory_end > 6 * 1024 * 1024 {
            2 * 1024 * 1024
        } else {
            1024 * 1024
        };
        Self::new(LOW_MEM, buffer_end, memory_end)
    }

    /// Reserved kernel boundary
    pub const fn low_mem(&self) -> u32 {
        self.low_mem
    }

    /// End of the buffer-cache region
    pub const fn buffer_end(&self) -> u32 {
        self.buffer_end
    }

    /// End of physical memory
    pub const fn memory_end(&self) -> u32 {
        self.memory_end
    }

    /// Total frames of physical memory
    pub const fn total_frames(&self) -> usize {
        self.memory_end as usize >> PAGE_SHIFT
    }

    /// Frames tracked by the pool (everything at or above `low_mem`)
    pub const fn pool_frames(&self) -> usize {
        ((self.memory_end - self.low_mem) as usize) >> PAGE_SHIFT
    }

    /// First pooled frame
    pub const fn first_pool_frame(&self) -> FrameId {
        FrameId(self.low_mem >> PAGE_SHIFT)
    }

    /// Whether `frame` lies in the reserved kernel region
    pub const fn is_reserved(&self, frame: FrameId) -> bool {
        frame.0 < (self.low_mem >> PAGE_SHIFT)
    }

    /// Kernel identity tables needed to map all of physical memory
    pub const fn kernel_tables(&self) -> usize {
        blocks_spanned(self.memory_end)
    }
}

impl Default for MemoryLayout {
    /// 16MB machine with a 2MB buffer cache
    fn default() -> Self {
        Self {
            low_mem: LOW_MEM,
            buffer_end: 2 * 1024 * 1024,
            memory_end: MAX_MEMORY,
        }
    }
}
