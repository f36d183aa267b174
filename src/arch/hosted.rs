//! Hosted builds: no hardware translation cache, no interrupts.

/// No stale hardware entries exist to flush
#[inline]
pub fn invalidate_tlb() {}

/// The global lock alone serialises callers
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    f()
}
