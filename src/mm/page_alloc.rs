//! Page Frame Allocator - Reference-Counted Physical Frame Pool
//!
//! Tracks one reference count per frame at or above `low_mem`:
//!
//! - `0`: free
//! - `1`: exclusively owned (private data page or a page table)
//! - `>= 2`: shared copy-on-write between address spaces
//! - [`USED`]: permanently taken by the buffer cache at init
//!
//! Frames below `low_mem` are kernel owned and never enter the pool; freeing
//! one is silently ignored so that address-space teardown can walk tables
//! that share kernel pages without special-casing them.
//!
//! This allocator only manages counts. Zero-filling is done by
//! [`MemoryManager::allocate_frame`](crate::mm::MemoryManager::allocate_frame),
//! which owns physical memory.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::FatalMemoryError;
use crate::mm::layout::{FrameId, MemoryLayout, PAGE_SHIFT, USED};

// ============================================================================
// Statistics
// ============================================================================

/// Frame pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames tracked by the pool
    pub total: u32,
    /// Frames with count 0
    pub free: u32,
    /// Frames with count >= 1
    pub used: u32,
    /// Frames with count >= 2 (excluding buffer-cache frames)
    pub shared: u32,
    /// Successful allocations since init
    pub allocations: u64,
    /// Frames returned to the pool since init
    pub frees: u64,
}

// ============================================================================
// Frame Allocator
// ============================================================================

/// Reference counts for every pooled frame (`mem_map`)
pub struct FrameAllocator {
    /// First pooled frame number
    first: u32,
    /// Count per frame, indexed from `first`
    counts: Vec<u16>,
    allocations: u64,
    frees: u64,
}

impl FrameAllocator {
    /// Build the pool for `layout`: buffer-cache frames are marked USED,
    /// the rest start free.
    pub fn new(layout: &MemoryLayout) -> Self {
        let first = layout.low_mem() >> PAGE_SHIFT;
        let mut counts = vec![0u16; layout.pool_frames()];
        let buffer_frames = ((layout.buffer_end() - layout.low_mem()) >> PAGE_SHIFT) as usize;
        for count in counts.iter_mut().take(buffer_frames) {
            *count = USED;
        }
        Self {
            first,
            counts,
            allocations: 0,
            frees: 0,
        }
    }

    /// Pool index of `frame`, `None` for reserved kernel frames
    fn index(&self, frame: FrameId) -> Result<Option<usize>, FatalMemoryError> {
        if frame.0 < self.first {
            return Ok(None);
        }
        let index = (frame.0 - self.first) as usize;
        if index >= self.counts.len() {
            return Err(FatalMemoryError::NonexistentPage(frame));
        }
        Ok(Some(index))
    }

    /// Take a free frame and set its count to 1.
    ///
    /// Scans from the top of memory down, so the highest free frame is
    /// handed out first.
    pub fn alloc(&mut self) -> Option<FrameId> {
        let index = self.counts.iter().rposition(|&count| count == 0)?;
        self.counts[index] = 1;
        self.allocations += 1;
        Some(FrameId(self.first + index as u32))
    }

    /// Drop one reference to `frame`.
    ///
    /// Reserved frames are ignored. The frame becomes allocatable again
    /// when its count reaches 0.
    pub fn free(&mut self, frame: FrameId) -> Result<(), FatalMemoryError> {
        let Some(index) = self.index(frame)? else {
            return Ok(());
        };
        match self.counts[index] {
            0 => Err(FatalMemoryError::DoubleFree(frame)),
            count => {
                self.counts[index] = count - 1;
                if count == 1 {
                    self.frees += 1;
                }
                Ok(())
            }
        }
    }

    /// Add one reference to `frame` (a new COW sharer).
    ///
    /// Reserved frames are ignored.
    pub fn share(&mut self, frame: FrameId) -> Result<(), FatalMemoryError> {
        let Some(index) = self.index(frame)? else {
            return Ok(());
        };
        self.counts[index] = self.counts[index]
            .checked_add(1)
            .ok_or(FatalMemoryError::RefCountOverflow(frame))?;
        Ok(())
    }

    /// Current count, `None` for reserved or nonexistent frames
    pub fn count(&self, frame: FrameId) -> Option<u16> {
        match self.index(frame) {
            Ok(Some(index)) => Some(self.counts[index]),
            _ => None,
        }
    }

    /// Whether `frame` is tracked by the pool
    pub fn is_pooled(&self, frame: FrameId) -> bool {
        matches!(self.index(frame), Ok(Some(_)))
    }

    /// Iterate `(frame, count)` over the whole pool
    pub fn iter(&self) -> impl Iterator<Item = (FrameId, u16)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(move |(index, &count)| (FrameId(self.first + index as u32), count))
    }

    /// Number of free frames
    pub fn free_count(&self) -> u32 {
        self.counts.iter().filter(|&&count| count == 0).count() as u32
    }

    /// Pool statistics
    pub fn stats(&self) -> FrameStats {
        let mut stats = FrameStats {
            total: self.counts.len() as u32,
            allocations: self.allocations,
            frees: self.frees,
            ..FrameStats::default()
        };
        for &count in &self.counts {
            match count {
                0 => stats.free += 1,
                1 => stats.used += 1,
                c if c >= USED => stats.used += 1,
                _ => {
                    stats.used += 1;
                    stats.shared += 1;
                }
            }
        }
        stats
    }
}
