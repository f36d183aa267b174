//! Error types for the memory subsystem using thiserror
//!
//! Two classes exist and are kept apart in the type system:
//!
//! - [`OutOfMemory`]: the frame pool is exhausted. Recoverable at the call
//!   site (fork fails with ENOMEM, a faulting task is killed).
//! - [`FatalMemoryError`]: the kernel's own bookkeeping is inconsistent.
//!   Never recovered; the kernel-facing wrappers halt on it.

use thiserror::Error;

use crate::mm::layout::{FrameId, VirtAddr};

/// No free page frame was available
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("out of memory: no free page frame")]
pub struct OutOfMemory;

/// Invariant violations that must halt the kernel
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalMemoryError {
    #[error("{op} called with wrong alignment ({addr})")]
    Misaligned { op: &'static str, addr: VirtAddr },

    #[error("{op} runs past the end of the page directory ({addr})")]
    OutOfRange { op: &'static str, addr: VirtAddr },

    #[error("copy_page_tables: already exist (directory entry {dir_index})")]
    AlreadyExists { dir_index: usize },

    #[error("trying to free free page ({0})")]
    DoubleFree(FrameId),

    #[error("trying to access nonexistent page ({0})")]
    NonexistentPage(FrameId),

    #[error("trying to free up swapper memory space")]
    ReleaseNullRange,

    #[error("page already mapped at {0}")]
    AlreadyMapped(VirtAddr),

    #[error("write-protect fault on unmapped address {0}")]
    NotMapped(VirtAddr),

    #[error("reference count overflow on {0}")]
    RefCountOverflow(FrameId),

    #[error("mem_map disagrees with {frame}: counted {expected} mappings, recorded {recorded}")]
    RefCountMismatch {
        frame: FrameId,
        expected: u16,
        recorded: u16,
    },
}

impl FatalMemoryError {
    /// Kernel panic: report and stop
    pub fn halt(self) -> ! {
        crate::println!("Kernel panic: {}", self);
        panic!("{}", self);
    }
}

/// Either failure class, for operations that can hit both
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),

    #[error(transparent)]
    Fatal(#[from] FatalMemoryError),
}

impl MmError {
    /// Whether the error must halt the kernel
    pub fn is_fatal(&self) -> bool {
        matches!(self, MmError::Fatal(_))
    }

    /// Split off the recoverable case, halting on a fatal one
    pub fn or_halt(self) -> OutOfMemory {
        match self {
            MmError::OutOfMemory(oom) => oom,
            MmError::Fatal(fatal) => fatal.halt(),
        }
    }
}

/// Outcome of touching user memory on a task's behalf
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// A fault could not be resolved and the task was sent SIGSEGV
    #[error("task killed while resolving a fault")]
    Killed,

    #[error(transparent)]
    Fatal(#[from] FatalMemoryError),
}

/// Errors raised while validating a memory layout
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    #[error("address {0:#x} is not page aligned")]
    Unaligned(u32),

    #[error("bounds out of order: low_mem {low_mem:#x}, buffer_end {buffer_end:#x}, memory_end {memory_end:#x}")]
    Unordered {
        low_mem: u32,
        buffer_end: u32,
        memory_end: u32,
    },

    #[error("low_mem {low_mem:#x} cannot hold kernel tables (needs {needed:#x})")]
    LowMemTooSmall { low_mem: u32, needed: u32 },

    #[error("memory_end {0:#x} leaves no room in the linear address space")]
    TooLarge(u32),
}
