//! Memory Report and Reference-Count Audit

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::error::FatalMemoryError;
use crate::mm::layout::{FrameId, ENTRIES_PER_DIRECTORY, ENTRIES_PER_TABLE, PAGE_SHIFT};
use crate::mm::manager::MemoryManager;

/// Present leaf entries in one task page table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableUsage {
    pub dir_index: usize,
    pub present: usize,
}

/// Snapshot printed by `calc_mem`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryReport {
    /// Free frames in the pool
    pub free: u32,
    /// Frames in the pool
    pub total: u32,
    /// One row per present directory entry above the kernel tables
    pub tables: Vec<TableUsage>,
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} pages free (of {})", self.free, self.total)?;
        for usage in &self.tables {
            writeln!(f, "Pg-dir[{}] uses {} pages", usage.dir_index, usage.present)?;
        }
        Ok(())
    }
}

impl MemoryManager {
    /// Count free frames and present pages per task table, and log them
    pub fn calc_mem(&self) -> Result<MemoryReport, FatalMemoryError> {
        let stats = self.frames.stats();
        let mut tables = Vec::new();
        for dir_index in self.layout.kernel_tables()..ENTRIES_PER_DIRECTORY {
            let dir = self.dir_entry(dir_index)?;
            if !dir.is_present() {
                continue;
            }
            let mut present = 0;
            for index in 0..ENTRIES_PER_TABLE {
                if self.table_entry(dir.frame(), index)?.is_present() {
                    present += 1;
                }
            }
            tables.push(TableUsage { dir_index, present });
        }

        let report = MemoryReport {
            free: stats.free,
            total: stats.total,
            tables,
        };
        crate::print!("{}", report);
        Ok(report)
    }

    /// Check every pooled frame's count against the mappings that exist.
    ///
    /// Each task page table counts once for its own frame and once per
    /// present leaf. Buffer-cache frames and the kernel identity tables are
    /// skipped. Only meaningful when no frame is allocated but unmapped.
    pub fn check_invariants(&self) -> Result<(), FatalMemoryError> {
        let first = self.layout.first_pool_frame().0;
        let mut expected = vec![0u32; self.layout.pool_frames()];
        let mut note = |frame: FrameId| {
            if let Some(count) = frame
                .0
                .checked_sub(first)
                .and_then(|index| expected.get_mut(index as usize))
            {
                *count += 1;
            }
        };

        for dir_index in self.layout.kernel_tables()..ENTRIES_PER_DIRECTORY {
            let dir = self.dir_entry(dir_index)?;
            if !dir.is_present() {
                continue;
            }
            note(dir.frame());
            for index in 0..ENTRIES_PER_TABLE {
                let entry = self.table_entry(dir.frame(), index)?;
                if entry.is_present() {
                    note(entry.frame());
                }
            }
        }

        let buffer_end = FrameId(self.layout.buffer_end() >> PAGE_SHIFT);
        for ((frame, recorded), &mapped) in self.frames.iter().zip(expected.iter()) {
            if frame.0 < buffer_end.0 {
                continue;
            }
            let expected = u16::try_from(mapped).unwrap_or(u16::MAX);
            if expected != recorded {
                return Err(FatalMemoryError::RefCountMismatch {
                    frame,
                    expected,
                    recorded,
                });
            }
        }
        Ok(())
    }
}
