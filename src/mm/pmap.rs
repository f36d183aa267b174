//! Physical Map - Single-Entry Page Table Primitives
//!
//! ## Key Operations
//!
//! - `map_one`: install one frame at one linear address, creating the
//!   covering page table on demand (`put_page`)
//! - `lookup`: read-only walk to the leaf entry
//! - `install_arg_pages`: place a program's argument pages below the top
//!   of its data segment
//!
//! `map_one` never rolls back a freshly installed page table: if the leaf
//! write cannot happen the table stays, and address-space teardown reclaims
//! it with everything else.

use crate::error::{FatalMemoryError, MmError, OutOfMemory};
use crate::mm::layout::{FrameId, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::mm::manager::MemoryManager;
use crate::mm::pte::{PageTableEntry, PteFlags, USER_RW};

/// Argument and environment pages handed to a new program (128KB)
pub const MAX_ARG_PAGES: usize = 32;

impl MemoryManager {
    /// Physical address of the leaf entry for `addr`, if its table exists
    pub(crate) fn leaf_slot(&self, addr: VirtAddr) -> Result<Option<PhysAddr>, FatalMemoryError> {
        let dir = self.dir_entry(addr.dir_index())?;
        if !dir.is_present() {
            return Ok(None);
        }
        Ok(Some(Self::table_slot(dir.frame(), addr.table_index())))
    }

    /// Leaf entry for `addr`, `None` unless both levels are present
    pub(crate) fn walk(&self, addr: VirtAddr) -> Result<Option<PageTableEntry>, FatalMemoryError> {
        let Some(slot) = self.leaf_slot(addr)? else {
            return Ok(None);
        };
        let entry = self.read_entry(slot)?;
        Ok(entry.is_present().then_some(entry))
    }

    /// Look up the leaf entry mapping `addr`
    pub fn lookup(&self, addr: VirtAddr) -> Option<PageTableEntry> {
        self.walk(addr).unwrap_or_else(|err| err.halt())
    }

    /// Install `frame` at `addr` as present and user-accessible.
    ///
    /// Allocates the covering page table if the directory entry is absent.
    /// Fails with [`OutOfMemory`] only when that table cannot be allocated.
    pub fn map_one(&mut self, frame: FrameId, addr: VirtAddr, writable: bool) -> Result<(), MmError> {
        if frame.0 as usize >= self.phys.frame_count() {
            return Err(FatalMemoryError::NonexistentPage(frame).into());
        }
        match self.frames.count(frame) {
            None => crate::println!("Trying to put page {} at {}", frame.addr(), addr),
            Some(1) => {}
            Some(_) => crate::println!("mem_map disagrees with {} at {}", frame.addr(), addr),
        }

        let dir_index = addr.dir_index();
        let dir = self.dir_entry(dir_index)?;
        let table = if dir.is_present() {
            dir.frame()
        } else {
            let table = self.allocate_frame().ok_or(OutOfMemory)?;
            self.set_dir_entry(dir_index, PageTableEntry::new(table, USER_RW))?;
            table
        };

        let slot = Self::table_slot(table, addr.table_index());
        if self.read_entry(slot)?.is_present() {
            return Err(FatalMemoryError::AlreadyMapped(addr).into());
        }
        let mut flags = PteFlags::PRESENT | PteFlags::USER;
        if writable {
            flags |= PteFlags::WRITABLE;
        }
        self.write_entry(slot, PageTableEntry::new(frame, flags))?;
        Ok(())
    }

    /// Map argument pages at descending addresses below `data_top`.
    ///
    /// Slot `i` lands at `data_top - (MAX_ARG_PAGES - i) * PAGE_SIZE`;
    /// empty slots leave their page unmapped.
    pub fn install_arg_pages(
        &mut self,
        pages: &[Option<FrameId>; MAX_ARG_PAGES],
        data_top: VirtAddr,
    ) -> Result<(), MmError> {
        let mut addr = data_top.0;
        let mut result = Ok(());
        for page in pages.iter().rev() {
            addr = addr.wrapping_sub(PAGE_SIZE as u32);
            if let Some(frame) = page {
                result = self.map_one(*frame, VirtAddr(addr), true);
                if result.is_err() {
                    break;
                }
            }
        }
        self.invalidate();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::layout::{task_base, MemoryLayout, LOW_MEM};

    fn small() -> MemoryManager {
        let layout = MemoryLayout::new(LOW_MEM, LOW_MEM, LOW_MEM + 8 * PAGE_SIZE as u32).unwrap();
        MemoryManager::new(layout)
    }

    #[test]
    fn test_map_one_creates_table_on_demand() {
        let mut mm = small();
        let addr = VirtAddr(task_base(1).0 + 0x3000);
        assert_eq!(mm.lookup(addr), None);

        let frame = mm.allocate_frame().unwrap();
        mm.map_one(frame, addr, true).unwrap();

        let entry = mm.lookup(addr).unwrap();
        assert_eq!(entry.frame(), frame);
        assert!(entry.is_writable() && entry.is_user());

        let table = mm.dir_entry(addr.dir_index()).unwrap().frame();
        assert_eq!(mm.ref_count(table), Some(1));
        assert_eq!(mm.frame_stats().used, 2);
    }

    #[test]
    fn test_map_one_read_only() {
        let mut mm = small();
        let frame = mm.allocate_frame().unwrap();
        mm.map_one(frame, task_base(2), false).unwrap();
        let entry = mm.lookup(task_base(2)).unwrap();
        assert!(entry.is_present() && !entry.is_writable());
    }

    #[test]
    fn test_map_one_reuses_existing_table() {
        let mut mm = small();
        let a = mm.allocate_frame().unwrap();
        let b = mm.allocate_frame().unwrap();
        mm.map_one(a, task_base(1), true).unwrap();
        let free_before = mm.frame_stats().free;
        mm.map_one(b, VirtAddr(task_base(1).0 + 0x1000), true).unwrap();
        assert_eq!(mm.frame_stats().free, free_before);
    }

    #[test]
    fn test_map_one_table_allocation_failure() {
        let mut mm = small();
        let mut last = None;
        while let Some(frame) = mm.allocate_frame() {
            last = Some(frame);
        }
        let result = mm.map_one(last.unwrap(), task_base(3), true);
        assert_eq!(result, Err(MmError::OutOfMemory(OutOfMemory)));
        assert_eq!(mm.lookup(task_base(3)), None);
    }

    #[test]
    fn test_map_one_rejects_double_mapping() {
        let mut mm = small();
        let frame = mm.allocate_frame().unwrap();
        mm.map_one(frame, task_base(1), true).unwrap();
        assert_eq!(
            mm.map_one(frame, task_base(1), true),
            Err(MmError::Fatal(FatalMemoryError::AlreadyMapped(task_base(1))))
        );
    }

    #[test]
    fn test_map_one_rejects_nonexistent_frame() {
        let mut mm = small();
        let beyond = FrameId(0x200);
        assert_eq!(
            mm.map_one(beyond, task_base(1), true),
            Err(MmError::Fatal(FatalMemoryError::NonexistentPage(beyond)))
        );
    }

    #[test]
    fn test_install_arg_pages() {
        let mut mm = small();
        let mut pages = [None; MAX_ARG_PAGES];
        let top_page = mm.allocate_frame().unwrap();
        let lower_page = mm.allocate_frame().unwrap();
        pages[MAX_ARG_PAGES - 1] = Some(top_page);
        pages[MAX_ARG_PAGES - 3] = Some(lower_page);

        let data_top = VirtAddr(task_base(1).0 + 0x0400_0000 - 0x40_0000);
        let flushes = mm.tlb_flushes();
        mm.install_arg_pages(&pages, data_top).unwrap();

        let top = VirtAddr(data_top.0 - PAGE_SIZE as u32);
        assert_eq!(mm.lookup(top).unwrap().frame(), top_page);
        assert_eq!(mm.lookup(VirtAddr(top.0 - PAGE_SIZE as u32)), None);
        assert_eq!(
            mm.lookup(VirtAddr(top.0 - 2 * PAGE_SIZE as u32)).unwrap().frame(),
            lower_page
        );
        assert_eq!(mm.tlb_flushes(), flushes + 1);
    }
}
