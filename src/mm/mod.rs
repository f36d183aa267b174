//! Paged Memory Subsystem
//!
//! Reference-counted physical frames, two-level page tables in a single
//! linear directory, copy-on-write fork and demand-zero faults.
//!
//! - `layout`: constants, address newtypes and the boot-time memory layout
//! - `phys`: simulated physical memory holding data pages and page tables
//! - `pte`: page-table entry encoding
//! - `page_alloc`: the reference-counted frame pool (`mem_map`)
//! - `manager`: [`MemoryManager`], sole owner of all of the above
//! - `pmap`, `fork`, `exit`, `fault`, `access`, `report`: operations on it
//!
//! The free functions in this module are the kernel-facing entry points.
//! They lock the global manager with interrupts disabled for the whole
//! operation and halt on any [`FatalMemoryError`]. A task killed by a fault
//! gets `SIGSEGV` only after the lock is released and interrupts are back
//! on, so its exit path may call [`free_page_tables`].

pub mod access;
pub mod exit;
pub mod fault;
pub mod fork;
pub mod layout;
pub mod manager;
pub mod page_alloc;
pub mod phys;
pub mod pmap;
pub mod pte;
pub mod report;

pub use fault::{FaultResolution, FaultStats, PageFaultError};
pub use layout::{FrameId, MemoryLayout, PhysAddr, VirtAddr, PAGE_SIZE};
pub use manager::MemoryManager;
pub use page_alloc::FrameStats;
pub use pmap::MAX_ARG_PAGES;
pub use pte::{PageTableEntry, PteFlags};
pub use report::{MemoryReport, TableUsage};

use spin::Mutex;

use crate::arch;
use crate::error::{AccessError, FatalMemoryError, MmError, OutOfMemory};
use crate::task::{Signal, TaskExit};

// ============================================================================
// Global State
// ============================================================================

static MEMORY: spin::Once<Mutex<MemoryManager>> = spin::Once::new();

/// Initialize the memory subsystem (`mem_init`).
///
/// Only the first call builds the manager; later calls return it as is.
pub fn init(layout: MemoryLayout) -> &'static Mutex<MemoryManager> {
    MEMORY.call_once(|| {
        crate::println!(
            "mem: {}KB physical, buffer cache to {:#x}, {} pages in pool",
            layout.memory_end() / 1024,
            layout.buffer_end(),
            layout.pool_frames(),
        );
        Mutex::new(MemoryManager::new(layout))
    })
}

/// Get the memory manager
pub fn memory_manager() -> &'static Mutex<MemoryManager> {
    MEMORY.get().expect("Memory manager not initialized")
}

fn with_manager<R>(f: impl FnOnce(&mut MemoryManager) -> R) -> R {
    arch::without_interrupts(|| f(&mut memory_manager().lock()))
}

fn or_halt<T>(result: Result<T, FatalMemoryError>) -> T {
    result.unwrap_or_else(|err| err.halt())
}

/// Terminate the task if its fault was unresolvable. Must run unlocked.
fn deliver(resolution: FaultResolution, task: &mut dyn TaskExit) -> FaultResolution {
    if resolution == FaultResolution::Killed {
        task.do_exit(Signal::SIGSEGV);
    }
    resolution
}

fn survived(result: Result<(), AccessError>, task: &mut dyn TaskExit) -> bool {
    match result {
        Ok(()) => true,
        Err(AccessError::Killed) => {
            task.do_exit(Signal::SIGSEGV);
            false
        }
        Err(AccessError::Fatal(err)) => err.halt(),
    }
}

// ============================================================================
// Frame Pool
// ============================================================================

/// Allocate a zeroed frame and return its physical address
pub fn get_free_page() -> Option<PhysAddr> {
    with_manager(|mm| mm.allocate_frame()).map(FrameId::addr)
}

/// Drop one reference to the frame at `addr`
pub fn free_page(addr: PhysAddr) {
    with_manager(|mm| or_halt(mm.free_frame(addr.frame())))
}

/// Map the frame at `page` at linear address `addr`, writable
pub fn put_page(page: PhysAddr, addr: VirtAddr) -> Result<(), OutOfMemory> {
    with_manager(|mm| {
        let result = mm.map_one(page.frame(), addr, true);
        // The new mapping must be visible before the caller touches it
        mm.invalidate();
        result.map_err(MmError::or_halt)
    })
}

// ============================================================================
// Address Spaces
// ============================================================================

/// Share `size` bytes of page tables from `from` into `to`
pub fn copy_page_tables(from: VirtAddr, to: VirtAddr, size: u32) -> Result<(), OutOfMemory> {
    with_manager(|mm| mm.duplicate(from, to, size).map_err(MmError::or_halt))
}

/// Release `size` bytes of address space at `from`
pub fn free_page_tables(from: VirtAddr, size: u32) {
    with_manager(|mm| or_halt(mm.release(from, size)))
}

/// Fork a task's memory; a failed fork leaves nothing behind
pub fn copy_mem(parent: VirtAddr, child: VirtAddr, limit: u32) -> Result<(), OutOfMemory> {
    with_manager(|mm| mm.copy_mem(parent, child, limit).map_err(MmError::or_halt))
}

/// Install argument pages below `data_top` as `exec` does
pub fn install_arg_pages(
    pages: &[Option<FrameId>; MAX_ARG_PAGES],
    data_top: VirtAddr,
) -> Result<(), OutOfMemory> {
    with_manager(|mm| mm.install_arg_pages(pages, data_top).map_err(MmError::or_halt))
}

// ============================================================================
// Faults
// ============================================================================

/// Page-fault trap entry: raw error code and faulting linear address
pub fn page_fault(error_code: u32, address: u32, task: &mut dyn TaskExit) -> FaultResolution {
    let error = PageFaultError::from_bits_truncate(error_code);
    let resolution = with_manager(|mm| or_halt(mm.page_fault(error, VirtAddr(address))));
    deliver(resolution, task)
}

/// Write-protect fault at `address`
pub fn do_wp_page(address: VirtAddr, task: &mut dyn TaskExit) -> FaultResolution {
    deliver(with_manager(|mm| or_halt(mm.do_wp_page(address))), task)
}

/// No-page fault at `address`
pub fn do_no_page(address: VirtAddr, task: &mut dyn TaskExit) -> FaultResolution {
    deliver(with_manager(|mm| or_halt(mm.do_no_page(address))), task)
}

/// Break sharing on one page before the kernel writes to it
pub fn write_verify(address: VirtAddr, task: &mut dyn TaskExit) -> Option<FaultResolution> {
    with_manager(|mm| or_halt(mm.write_verify(address))).map(|res| deliver(res, task))
}

/// Break sharing on a range; `false` if the task was killed
pub fn verify_area(address: VirtAddr, size: u32, task: &mut dyn TaskExit) -> bool {
    survived(with_manager(|mm| mm.verify_area(address, size)), task)
}

/// Kernel write into task memory; `false` if the task was killed
pub fn copy_to_user(address: VirtAddr, data: &[u8], task: &mut dyn TaskExit) -> bool {
    survived(with_manager(|mm| mm.copy_to_user(address, data)), task)
}

// ============================================================================
// Reporting
// ============================================================================

/// Log and return free frames and per-table usage
pub fn calc_mem() -> MemoryReport {
    with_manager(|mm| or_halt(mm.calc_mem()))
}

/// Frame pool statistics
pub fn frame_stats() -> FrameStats {
    with_manager(|mm| mm.frame_stats())
}

/// Fault handler statistics
pub fn fault_stats() -> FaultStats {
    with_manager(|mm| mm.fault_stats())
}
