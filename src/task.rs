//! Task interface consumed by the fault handler
//!
//! The memory subsystem never schedules; when a fault cannot be resolved
//! for lack of memory it asks the scheduler to terminate the faulting task.
//! The request is made from the kernel-facing fault entry points once the
//! memory manager is unlocked, so the exit path may free the task's memory.

/// Signals the memory subsystem delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Signal {
    /// Segmentation violation
    SIGSEGV = 11,
}

impl Signal {
    /// Signal number
    pub const fn number(self) -> u32 {
        self as u32
    }
}

/// Process-termination entry point provided by the scheduler
pub trait TaskExit {
    /// Terminate the current task with `signal`
    fn do_exit(&mut self, signal: Signal);
}

impl<F: FnMut(Signal)> TaskExit for F {
    fn do_exit(&mut self, signal: Signal) {
        self(signal)
    }
}
