//! vmcore - paged virtual memory for a small i386 kernel
//!
//! Reference-counted physical frames, two-level page tables, copy-on-write
//! `fork` and demand-zero page faults, in the style of a classic
//! single-directory Unix kernel.
//!
//! The crate runs both on bare metal and on a hosted target. Physical
//! memory is an owned, bounds-checked arena, so every page-table walk is a
//! typed index rather than a raw pointer; only translation-cache flushes and
//! interrupt masking reach the hardware (see [`arch`]).

#![no_std]
// Kernel entry points keep their traditional names and shapes
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_div_ceil)]

extern crate alloc;

#[macro_use]
pub mod console;

pub mod arch;
pub mod error;
pub mod mm;
pub mod task;

pub use error::{AccessError, FatalMemoryError, LayoutError, MmError, OutOfMemory};
pub use mm::{MemoryLayout, MemoryManager};
pub use task::{Signal, TaskExit};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = "vmcore";
