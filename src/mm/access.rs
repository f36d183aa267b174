//! User-Memory Access
//!
//! Reads and writes of a task's linear addresses performed the way the
//! MMU performs them: an absent page takes a no-page fault, a user write
//! to a read-only page takes a write-protect fault, and only then does the
//! access land on the physical frame.
//!
//! `copy_to_user` is the privileged variant used when the kernel fills a
//! task's memory on its behalf. Privileged writes ignore the writable bit,
//! so sharing is broken up front with `verify_area`.

use crate::error::{AccessError, FatalMemoryError};
use crate::mm::fault::FaultResolution;
use crate::mm::layout::{FrameId, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::mm::manager::MemoryManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    UserWrite,
    KernelWrite,
}

fn survived(resolution: FaultResolution) -> Result<(), AccessError> {
    match resolution {
        FaultResolution::Killed => Err(AccessError::Killed),
        _ => Ok(()),
    }
}

impl MemoryManager {
    /// Frame backing `addr` once the access is allowed to proceed
    fn translate(
        &mut self,
        addr: VirtAddr,
        access: Access,
    ) -> Result<FrameId, AccessError> {
        let entry = match self.walk(addr)? {
            Some(entry) => entry,
            None => {
                let resolution = self.do_no_page(addr)?;
                survived(resolution)?;
                self.walk(addr)?.ok_or(FatalMemoryError::NotMapped(addr))?
            }
        };
        if access == Access::UserWrite && !entry.is_writable() {
            let resolution = self.do_wp_page(addr)?;
            survived(resolution)?;
            let entry = self.walk(addr)?.ok_or(FatalMemoryError::NotMapped(addr))?;
            return Ok(entry.frame());
        }
        Ok(entry.frame())
    }

    /// Visit `len` bytes at `addr` one page-bounded chunk at a time
    fn for_each_chunk(
        &mut self,
        addr: VirtAddr,
        len: usize,
        access: Access,
        mut f: impl FnMut(&mut Self, PhysAddr, usize, usize) -> Result<(), FatalMemoryError>,
    ) -> Result<(), AccessError> {
        let mut done = 0;
        while done < len {
            let va = VirtAddr(addr.0.wrapping_add(done as u32));
            let chunk = (PAGE_SIZE - va.page_offset()).min(len - done);
            let frame = self.translate(va, access)?;
            let pa = PhysAddr(frame.addr().0 + va.page_offset() as u32);
            f(self, pa, done, chunk)?;
            done += chunk;
        }
        Ok(())
    }

    /// Read `buf.len()` bytes at `addr` as a user-mode load would
    pub fn read_user(&mut self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), AccessError> {
        let len = buf.len();
        self.for_each_chunk(addr, len, Access::Read, |mm, pa, done, chunk| {
            for (i, byte) in buf[done..done + chunk].iter_mut().enumerate() {
                *byte = mm.phys.read_byte(PhysAddr(pa.0 + i as u32))?;
            }
            Ok(())
        })
    }

    /// Write `data` at `addr` as a user-mode store would
    pub fn write_user(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), AccessError> {
        self.store(addr, data, Access::UserWrite)
    }

    /// Kernel write into a task's memory (argument strings, program images)
    pub fn copy_to_user(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), AccessError> {
        if data.is_empty() {
            return Ok(());
        }
        self.verify_area(addr, data.len() as u32)?;
        self.store(addr, data, Access::KernelWrite)
    }

    fn store(&mut self, addr: VirtAddr, data: &[u8], access: Access) -> Result<(), AccessError> {
        self.for_each_chunk(addr, data.len(), access, |mm, pa, done, chunk| {
            for (i, byte) in data[done..done + chunk].iter().enumerate() {
                mm.phys.write_byte(PhysAddr(pa.0 + i as u32), *byte)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::layout::{task_base, MemoryLayout, BLOCK_SIZE, LOW_MEM};

    fn manager(pool_pages: u32) -> MemoryManager {
        let layout =
            MemoryLayout::new(LOW_MEM, LOW_MEM, LOW_MEM + pool_pages * PAGE_SIZE as u32).unwrap();
        MemoryManager::new(layout)
    }

    #[test]
    fn test_write_then_read_across_pages() {
        let mut mm = manager(8);
        let addr = VirtAddr(task_base(1).0 + PAGE_SIZE as u32 - 3);
        mm.write_user(addr, b"kernel").unwrap();

        let mut buf = [0u8; 6];
        mm.read_user(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"kernel");
        // Two demand-zero pages, one table
        assert_eq!(mm.fault_stats().zero_filled, 2);
        assert_eq!(mm.frame_stats().free, 5);
    }

    #[test]
    fn test_read_of_absent_page_is_zero() {
        let mut mm = manager(4);
        let mut buf = [0xAAu8; 16];
        mm.read_user(VirtAddr(task_base(2).0 + 0x40), &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_child_write_is_invisible_to_parent() {
        let mut mm = manager(16);
        let a = task_base(1);
        let b = task_base(2);
        mm.write_user(a, &[0x11; 32]).unwrap();
        mm.duplicate(a, b, BLOCK_SIZE).unwrap();

        mm.write_user(VirtAddr(b.0 + 8), &[0x22; 4]).unwrap();

        let mut parent = [0u8; 32];
        mm.read_user(a, &mut parent).unwrap();
        assert_eq!(parent, [0x11; 32]);

        let mut child = [0u8; 12];
        mm.read_user(b, &mut child).unwrap();
        assert_eq!(&child[..8], &[0x11; 8]);
        assert_eq!(&child[8..], &[0x22; 4]);
    }

    #[test]
    fn test_reads_keep_sharing() {
        let mut mm = manager(16);
        let a = task_base(1);
        let b = task_base(2);
        mm.write_user(a, &[1, 2, 3]).unwrap();
        let frame = mm.lookup(a).unwrap().frame();
        mm.duplicate(a, b, BLOCK_SIZE).unwrap();

        let mut buf = [0u8; 3];
        mm.read_user(b, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(mm.ref_count(frame), Some(2));
    }

    #[test]
    fn test_copy_to_user_breaks_sharing_first() {
        let mut mm = manager(16);
        let a = task_base(1);
        let b = task_base(2);
        mm.write_user(a, b"parent").unwrap();
        mm.duplicate(a, b, BLOCK_SIZE).unwrap();

        mm.copy_to_user(b, b"child!").unwrap();
        assert!(mm.lookup(b).unwrap().is_writable());

        let mut buf = [0u8; 6];
        mm.read_user(a, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
        mm.read_user(b, &mut buf).unwrap();
        assert_eq!(&buf, b"child!");
    }

    #[test]
    fn test_copy_to_user_fills_absent_pages() {
        let mut mm = manager(8);
        let addr = VirtAddr(task_base(3).0 + 0x10);
        mm.copy_to_user(addr, b"argv").unwrap();

        let mut buf = [0u8; 4];
        mm.read_user(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"argv");
    }

    #[test]
    fn test_access_reports_killed_task() {
        let mut mm = manager(2);
        while mm.allocate_frame().is_some() {}

        assert_eq!(mm.write_user(task_base(1), &[1]), Err(AccessError::Killed));
        assert_eq!(mm.fault_stats().killed, 1);
    }
}
