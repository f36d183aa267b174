//! Address-Space Teardown
//!
//! `release` walks whole directory entries, dropping one reference to every
//! present data frame and freeing each page table. Frames shared with a
//! sibling survive until their last mapping goes; kernel frames below
//! `low_mem` are skipped by the allocator.
//!
//! The caller must make sure nothing can fault against the range while it
//! is being released.

use crate::error::FatalMemoryError;
use crate::mm::layout::{blocks_spanned, VirtAddr, ENTRIES_PER_DIRECTORY, ENTRIES_PER_TABLE};
use crate::mm::manager::MemoryManager;
use crate::mm::pte::PageTableEntry;

const OP: &str = "free_page_tables";

impl MemoryManager {
    /// Release `size` bytes of address space starting at `from`
    pub fn release(&mut self, from: VirtAddr, size: u32) -> Result<(), FatalMemoryError> {
        if !from.is_block_aligned() {
            return Err(FatalMemoryError::Misaligned { op: OP, addr: from });
        }
        if from.0 == 0 {
            return Err(FatalMemoryError::ReleaseNullRange);
        }
        let blocks = blocks_spanned(size);
        if from.dir_index() + blocks > ENTRIES_PER_DIRECTORY {
            return Err(FatalMemoryError::OutOfRange { op: OP, addr: from });
        }

        let mut result = Ok(());
        for dir_index in from.dir_index()..from.dir_index() + blocks {
            result = self.release_block(dir_index);
            if result.is_err() {
                break;
            }
        }
        self.invalidate();
        result
    }

    fn release_block(&mut self, dir_index: usize) -> Result<(), FatalMemoryError> {
        let dir = self.dir_entry(dir_index)?;
        if !dir.is_present() {
            return Ok(());
        }
        let table = dir.frame();
        for index in 0..ENTRIES_PER_TABLE {
            let entry = self.table_entry(table, index)?;
            if entry.is_present() {
                self.frames.free(entry.frame())?;
            }
            self.set_table_entry(table, index, PageTableEntry::EMPTY)?;
        }
        self.frames.free(table)?;
        self.set_dir_entry(dir_index, PageTableEntry::EMPTY)
    }
}
