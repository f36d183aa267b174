//! Memory Manager - Owner of Physical Memory and Frame Counts
//!
//! The manager is the single owner of every piece of mutable VM state:
//! the physical frames, the frame reference counts, and (because they live
//! in frames) every page directory and page table. Address spaces are
//! ranges of the one linear directory and hold nothing but frame numbers.
//!
//! Operations are split by concern across sibling modules, each adding an
//! `impl MemoryManager` block:
//!
//! - `pmap`: single-entry primitives (`map_one`, `lookup`)
//! - `fork`: address-space duplication (`duplicate`, `copy_mem`)
//! - `exit`: address-space teardown (`release`)
//! - `fault`: write-protect and no-page fault resolution
//! - `access`: user-memory reads and writes as the MMU would perform them
//! - `report`: `calc_mem` and the reference-count audit

use crate::arch;
use crate::error::FatalMemoryError;
use crate::mm::fault::FaultStats;
use crate::mm::layout::{FrameId, MemoryLayout, PhysAddr, ENTRIES_PER_TABLE};
use crate::mm::page_alloc::{FrameAllocator, FrameStats};
use crate::mm::phys::PhysMemory;
use crate::mm::pte::{PageTableEntry, USER_RW};

/// Frame holding the page directory
pub const PAGE_DIRECTORY: FrameId = FrameId(0);

/// Physical memory, frame pool and translation structures
pub struct MemoryManager {
    pub(crate) layout: MemoryLayout,
    pub(crate) phys: PhysMemory,
    pub(crate) frames: FrameAllocator,
    pub(crate) fault_stats: FaultStats,
    tlb_flushes: u64,
}

impl MemoryManager {
    /// Initialise the frame pool and build the bootstrap address space.
    ///
    /// Every frame below `memory_end` is identity mapped present, writable
    /// and user-accessible through kernel tables in frames `1..=k`.
    pub fn new(layout: MemoryLayout) -> Self {
        let mut mm = Self {
            layout,
            phys: PhysMemory::new(layout.total_frames()),
            frames: FrameAllocator::new(&layout),
            fault_stats: FaultStats::default(),
            tlb_flushes: 0,
        };
        if let Err(err) = mm.build_identity_map() {
            err.halt();
        }
        mm
    }

    fn build_identity_map(&mut self) -> Result<(), FatalMemoryError> {
        let total = self.layout.total_frames();
        for dir_index in 0..self.layout.kernel_tables() {
            let table = FrameId(dir_index as u32 + 1);
            self.set_dir_entry(dir_index, PageTableEntry::new(table, USER_RW))?;
            for index in 0..ENTRIES_PER_TABLE {
                let frame = dir_index * ENTRIES_PER_TABLE + index;
                if frame >= total {
                    break;
                }
                self.set_table_entry(table, index, PageTableEntry::new(FrameId(frame as u32), USER_RW))?;
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Layout this manager was built from
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Physical memory, for inspection
    pub fn phys(&self) -> &PhysMemory {
        &self.phys
    }

    /// Physical memory, for loaders filling freshly allocated frames
    pub fn phys_mut(&mut self) -> &mut PhysMemory {
        &mut self.phys
    }

    // ========================================================================
    // Frame allocation
    // ========================================================================

    /// Take a free frame, zero it, and return it with count 1.
    ///
    /// Returns `None` when the pool is exhausted. Never returns a frame
    /// below `low_mem`.
    pub fn allocate_frame(&mut self) -> Option<FrameId> {
        let frame = self.frames.alloc()?;
        if let Err(err) = self.phys.zero_frame(frame) {
            err.halt();
        }
        Some(frame)
    }

    /// Drop one reference to `frame`; reserved kernel frames are ignored.
    pub fn free_frame(&mut self, frame: FrameId) -> Result<(), FatalMemoryError> {
        self.frames.free(frame)
    }

    /// Reference count of a pooled frame
    pub fn ref_count(&self, frame: FrameId) -> Option<u16> {
        self.frames.count(frame)
    }

    /// Frame pool statistics
    pub fn frame_stats(&self) -> FrameStats {
        self.frames.stats()
    }

    /// Fault handler statistics
    pub fn fault_stats(&self) -> FaultStats {
        self.fault_stats
    }

    // ========================================================================
    // Translation cache
    // ========================================================================

    /// End a batch of table updates
    pub(crate) fn invalidate(&mut self) {
        arch::invalidate_tlb();
        self.tlb_flushes += 1;
    }

    /// Translation-cache flushes issued so far
    pub fn tlb_flushes(&self) -> u64 {
        self.tlb_flushes
    }

    // ========================================================================
    // Raw entry access
    // ========================================================================

    /// Physical address of directory entry `index`
    pub(crate) fn dir_slot(index: usize) -> PhysAddr {
        PhysAddr(PAGE_DIRECTORY.addr().0 + (index as u32) * 4)
    }

    /// Physical address of entry `index` in the table held by `table`
    pub(crate) fn table_slot(table: FrameId, index: usize) -> PhysAddr {
        PhysAddr(table.addr().0 + (index as u32) * 4)
    }

    pub(crate) fn read_entry(&self, slot: PhysAddr) -> Result<PageTableEntry, FatalMemoryError> {
        self.phys.read_u32(slot).map(PageTableEntry::from_raw)
    }

    pub(crate) fn write_entry(
        &mut self,
        slot: PhysAddr,
        entry: PageTableEntry,
    ) -> Result<(), FatalMemoryError> {
        self.phys.write_u32(slot, entry.raw())
    }

    pub(crate) fn dir_entry(&self, index: usize) -> Result<PageTableEntry, FatalMemoryError> {
        self.read_entry(Self::dir_slot(index))
    }

    pub(crate) fn set_dir_entry(
        &mut self,
        index: usize,
        entry: PageTableEntry,
    ) -> Result<(), FatalMemoryError> {
        self.write_entry(Self::dir_slot(index), entry)
    }

    pub(crate) fn table_entry(
        &self,
        table: FrameId,
        index: usize,
    ) -> Result<PageTableEntry, FatalMemoryError> {
        self.read_entry(Self::table_slot(table, index))
    }

    pub(crate) fn set_table_entry(
        &mut self,
        table: FrameId,
        index: usize,
        entry: PageTableEntry,
    ) -> Result<(), FatalMemoryError> {
        self.write_entry(Self::table_slot(table, index), entry)
    }
}
