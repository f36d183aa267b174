//! i386 paging hooks

use core::arch::asm;

/// EFLAGS interrupt-enable bit
const EFLAGS_IF: u32 = 1 << 9;

/// Flush the whole TLB by reloading CR3
#[inline]
pub fn invalidate_tlb() {
    // SAFETY: rewriting CR3 with its current value only drops cached
    // translations; the active page directory does not change.
    unsafe {
        asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags),
        );
    }
}

/// Run `f` with interrupts disabled, restoring the previous state after
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let eflags: u32;
    // SAFETY: reads EFLAGS and clears IF; both are restored below.
    unsafe {
        asm!("pushfd", "pop {}", "cli", out(reg) eflags);
    }
    let result = f();
    if eflags & EFLAGS_IF != 0 {
        // SAFETY: interrupts were enabled on entry.
        unsafe {
            asm!("sti", options(nomem, nostack));
        }
    }
    result
}
