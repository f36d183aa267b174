//! Architecture-specific hooks for the memory subsystem
//!
//! Only two operations are needed from the CPU:
//!
//! - invalidating the translation cache after a batch of table updates
//! - running a critical section with interrupts disabled
//!
//! On a bare-metal i386 build these touch CR3 and EFLAGS.IF. Everywhere
//! else (hosted builds, tests) the translation cache is purely software,
//! so both collapse to plain calls.

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod i386;

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod hosted;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use i386::*;

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use hosted::*;
