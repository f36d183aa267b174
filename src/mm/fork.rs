//! Address-Space Duplication - Copy-on-Write Fork
//!
//! `duplicate` copies page tables, never pages. Each shared data frame is
//! write-protected in both the parent and the child and gains one
//! reference; the first write on either side takes a write-protect fault
//! that gives the writer its own copy (see `fault`).
//!
//! Ranges are handled in whole directory entries (4MB), so both start
//! addresses must be block aligned.
//!
//! Duplicating the bootstrap range (linear address 0) is special: only the
//! first 160 entries (640KB) of each table are copied. Those pages are
//! kernel frames below `low_mem`, so they are shared as-is with no
//! reference counting and no write protection.

use crate::error::{FatalMemoryError, MmError, OutOfMemory};
use crate::mm::layout::{
    blocks_spanned, VirtAddr, BOOTSTRAP_COPY_ENTRIES, ENTRIES_PER_DIRECTORY, ENTRIES_PER_TABLE,
};
use crate::mm::manager::MemoryManager;
use crate::mm::pte::{PageTableEntry, USER_RW};

const OP: &str = "copy_page_tables";

impl MemoryManager {
    /// Share `size` bytes of `from` into the empty range at `to`.
    ///
    /// On [`OutOfMemory`] the blocks already duplicated stay in place;
    /// the caller reclaims them with [`release`](Self::release).
    pub fn duplicate(&mut self, from: VirtAddr, to: VirtAddr, size: u32) -> Result<(), MmError> {
        for addr in [from, to] {
            if !addr.is_block_aligned() {
                return Err(FatalMemoryError::Misaligned { op: OP, addr }.into());
            }
        }
        let blocks = blocks_spanned(size);
        for addr in [from, to] {
            if addr.dir_index() + blocks > ENTRIES_PER_DIRECTORY {
                return Err(FatalMemoryError::OutOfRange { op: OP, addr }.into());
            }
        }

        let entries = if from.0 == 0 {
            BOOTSTRAP_COPY_ENTRIES
        } else {
            ENTRIES_PER_TABLE
        };
        let mut result = Ok(());
        for block in 0..blocks {
            result = self.duplicate_block(from.dir_index() + block, to.dir_index() + block, entries);
            if result.is_err() {
                break;
            }
        }
        // Parent entries may already be write-protected even on failure
        self.invalidate();
        result
    }

    fn duplicate_block(
        &mut self,
        from_index: usize,
        to_index: usize,
        entries: usize,
    ) -> Result<(), MmError> {
        if self.dir_entry(to_index)?.is_present() {
            return Err(FatalMemoryError::AlreadyExists {
                dir_index: to_index,
            }
            .into());
        }
        let source = self.dir_entry(from_index)?;
        if !source.is_present() {
            return Ok(());
        }
        let from_table = source.frame();
        let to_table = self.allocate_frame().ok_or(OutOfMemory)?;
        self.set_dir_entry(to_index, PageTableEntry::new(to_table, USER_RW))?;

        for index in 0..entries {
            let entry = self.table_entry(from_table, index)?;
            if !entry.is_present() {
                continue;
            }
            if self.layout.is_reserved(entry.frame()) {
                self.set_table_entry(to_table, index, entry)?;
                continue;
            }
            let shared = entry.write_protected();
            self.frames.share(entry.frame())?;
            self.set_table_entry(from_table, index, shared)?;
            self.set_table_entry(to_table, index, shared)?;
        }
        Ok(())
    }

    /// Duplicate a parent's memory for a new child (`copy_mem`).
    ///
    /// On [`OutOfMemory`] the partially built child range is released
    /// before the error is returned, leaving the parent's sharing counts
    /// as they were.
    pub fn copy_mem(&mut self, parent: VirtAddr, child: VirtAddr, limit: u32) -> Result<(), MmError> {
        match self.duplicate(parent, child, limit) {
            Err(MmError::OutOfMemory(oom)) => {
                self.release(child, limit)?;
                Err(oom.into())
            }
            other => other,
        }
    }
}
