//! Page Fault Handling
//!
//! Two kinds of fault reach the memory subsystem:
//!
//! - **Write-protect**: a write hit a present, read-only mapping. If the
//!   frame has a single owner the writable bit is simply restored;
//!   otherwise the writer gets a private copy.
//! - **No-page**: the mapping is absent. A zero-filled frame is mapped at
//!   the faulting page. This is the only source of anonymous memory.
//!
//! When no frame is available the fault resolves to
//! [`FaultResolution::Killed`] and the kernel keeps running. Delivering
//! `SIGSEGV` is left to the caller, which must first drop the manager so the
//! exiting task can release its own address space.
//!
//! Restoration is lazy. When one side of a shared page copies away, the
//! other side's mapping stays read-only until that side faults on it.

use bitflags::bitflags;

use crate::error::{AccessError, FatalMemoryError, MmError};
use crate::mm::layout::{FrameId, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::mm::manager::MemoryManager;
use crate::mm::pte::{PageTableEntry, USER_RW};

bitflags! {
    /// Page-fault error code pushed by the processor
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultError: u32 {
        /// Protection violation on a present page (clear: page absent)
        const PRESENT = 1 << 0;
        /// The access was a write
        const WRITE = 1 << 1;
        /// The access came from user mode
        const USER = 1 << 2;
    }
}

/// How a fault was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// Sole owner: the writable bit was set in place
    Restored,
    /// Shared frame: the writer now maps this private copy
    Copied(FrameId),
    /// Absent page: this fresh zeroed frame was mapped
    ZeroFilled(FrameId),
    /// No frame available; the task must be sent `SIGSEGV`
    Killed,
}

/// Fault statistics counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    /// Faults dispatched
    pub total: u64,
    /// Write-protect faults
    pub wp_faults: u64,
    /// No-page faults
    pub no_page_faults: u64,
    /// Resolved by restoring the writable bit
    pub restored: u64,
    /// Resolved by copying a shared frame
    pub copied: u64,
    /// Resolved with a fresh zeroed frame
    pub zero_filled: u64,
    /// Faults that left the task to be terminated
    pub killed: u64,
}

impl MemoryManager {
    /// Dispatch a fault on the error code's `PRESENT` bit
    pub fn page_fault(
        &mut self,
        error: PageFaultError,
        addr: VirtAddr,
    ) -> Result<FaultResolution, FatalMemoryError> {
        if error.contains(PageFaultError::PRESENT) {
            self.do_wp_page(addr)
        } else {
            self.do_no_page(addr)
        }
    }

    /// Resolve a write to a present, read-only mapping
    pub fn do_wp_page(&mut self, addr: VirtAddr) -> Result<FaultResolution, FatalMemoryError> {
        self.fault_stats.total += 1;
        self.fault_stats.wp_faults += 1;

        let slot = self
            .leaf_slot(addr)?
            .ok_or(FatalMemoryError::NotMapped(addr))?;
        if !self.read_entry(slot)?.is_present() {
            return Err(FatalMemoryError::NotMapped(addr));
        }
        self.un_wp_page(slot, addr)
    }

    /// Give the mapping at `slot` an exclusively owned, writable frame
    fn un_wp_page(
        &mut self,
        slot: PhysAddr,
        addr: VirtAddr,
    ) -> Result<FaultResolution, FatalMemoryError> {
        let entry = self.read_entry(slot)?;
        let old = entry.frame();
        let reserved = self.layout.is_reserved(old);

        if !reserved && self.frames.count(old) == Some(1) {
            self.write_entry(slot, entry.made_writable())?;
            self.invalidate();
            self.fault_stats.restored += 1;
            return Ok(FaultResolution::Restored);
        }

        let Some(new) = self.allocate_frame() else {
            return Ok(self.kill(addr));
        };
        self.phys.copy_frame(old, new)?;
        if !reserved {
            self.frames.free(old)?;
        }
        self.write_entry(slot, PageTableEntry::new(new, USER_RW))?;
        self.invalidate();
        self.fault_stats.copied += 1;
        Ok(FaultResolution::Copied(new))
    }

    /// Map a fresh zeroed frame at the page containing `addr`
    pub fn do_no_page(&mut self, addr: VirtAddr) -> Result<FaultResolution, FatalMemoryError> {
        self.fault_stats.total += 1;
        self.fault_stats.no_page_faults += 1;

        let Some(frame) = self.allocate_frame() else {
            return Ok(self.kill(addr));
        };
        match self.map_one(frame, addr.trunc_page(), true) {
            Ok(()) => {
                self.invalidate();
                self.fault_stats.zero_filled += 1;
                Ok(FaultResolution::ZeroFilled(frame))
            }
            Err(MmError::OutOfMemory(_)) => {
                // No room for the page table
                self.frames.free(frame)?;
                Ok(self.kill(addr))
            }
            Err(MmError::Fatal(fatal)) => Err(fatal),
        }
    }

    fn kill(&mut self, addr: VirtAddr) -> FaultResolution {
        crate::println!("out of memory at {}: task gets SIGSEGV", addr);
        self.fault_stats.killed += 1;
        FaultResolution::Killed
    }

    /// Break sharing on the page at `addr` before the kernel writes to it.
    ///
    /// Acts only on a present, read-only mapping; returns `None` otherwise.
    pub fn write_verify(
        &mut self,
        addr: VirtAddr,
    ) -> Result<Option<FaultResolution>, FatalMemoryError> {
        let Some(slot) = self.leaf_slot(addr)? else {
            return Ok(None);
        };
        let entry = self.read_entry(slot)?;
        if entry.is_present() && !entry.is_writable() {
            self.un_wp_page(slot, addr).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Run [`write_verify`](Self::write_verify) over every page touched by
    /// `size` bytes at `addr`. Stops at the first killed task.
    pub fn verify_area(&mut self, addr: VirtAddr, size: u32) -> Result<(), AccessError> {
        let start = addr.trunc_page();
        // Stop at the top of the linear space rather than wrap to 0
        let end = (start.0 as u64 + addr.page_offset() as u64 + size as u64).min(1 << 32);
        let mut page = start.0 as u64;
        while page < end {
            if let Some(FaultResolution::Killed) = self.write_verify(VirtAddr(page as u32))? {
                return Err(AccessError::Killed);
            }
            page += PAGE_SIZE as u64;
        }
        Ok(())
    }
}
