//! Narrow view of the scheduler used by the VM subsystem.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Identity of a kernel thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

/// What the scheduler tells us about the executing core.
pub trait ExecutionContext: Send + Sync {
    /// False early in boot, before per-core state is set up.
    fn cpu_exists(&self) -> bool;

    /// Spinlocks currently held by this core.
    fn spinlocks_held(&self) -> u32;

    /// Whether this core is inside an interrupt handler.
    fn in_interrupt(&self) -> bool;

    fn current_thread(&self) -> Option<ThreadId>;
}

/// Asserts the caller may block on the allocator lock.
///
/// Operations that can sleep in a real VM system check this even when they
/// do not actually sleep here, so callers that are wrong today fail now.
pub fn assert_can_sleep(ctx: &dyn ExecutionContext) {
    if !ctx.cpu_exists() {
        return;
    }
    assert_eq!(
        ctx.spinlocks_held(),
        0,
        "blocking VM operation while holding a spinlock"
    );
    assert!(
        !ctx.in_interrupt(),
        "blocking VM operation from an interrupt handler"
    );
}

/// Execution context kept in atomics, for early boot and for tests.
#[derive(Debug)]
pub struct CpuState {
    exists: AtomicBool,
    spinlocks: AtomicU32,
    in_interrupt: AtomicBool,
    // 0 means no current thread
    thread: AtomicU32,
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuState {
    pub const fn new() -> Self {
        CpuState {
            exists: AtomicBool::new(true),
            spinlocks: AtomicU32::new(0),
            in_interrupt: AtomicBool::new(false),
            thread: AtomicU32::new(0),
        }
    }

    /// Context before any core has been brought up.
    pub const fn early_boot() -> Self {
        CpuState {
            exists: AtomicBool::new(false),
            spinlocks: AtomicU32::new(0),
            in_interrupt: AtomicBool::new(false),
            thread: AtomicU32::new(0),
        }
    }

    pub fn set_cpu_exists(&self, exists: bool) {
        self.exists.store(exists, Ordering::SeqCst);
    }

    pub fn acquire_spinlock(&self) {
        self.spinlocks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release_spinlock(&self) {
        let held = self.spinlocks.fetch_sub(1, Ordering::SeqCst);
        assert!(held > 0, "releasing a spinlock that is not held");
    }

    pub fn set_in_interrupt(&self, in_interrupt: bool) {
        self.in_interrupt.store(in_interrupt, Ordering::SeqCst);
    }

    pub fn set_current_thread(&self, thread: Option<ThreadId>) {
        self.thread
            .store(thread.map_or(0, |ThreadId(id)| id), Ordering::SeqCst);
    }
}

impl ExecutionContext for CpuState {
    fn cpu_exists(&self) -> bool {
        self.exists.load(Ordering::SeqCst)
    }

    fn spinlocks_held(&self) -> u32 {
        self.spinlocks.load(Ordering::SeqCst)
    }

    fn in_interrupt(&self) -> bool {
        self.in_interrupt.load(Ordering::SeqCst)
    }

    fn current_thread(&self) -> Option<ThreadId> {
        match self.thread.load(Ordering::SeqCst) {
            0 => None,
            id => Some(ThreadId(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeping_is_fine_in_thread_context() {
        let cpu = CpuState::new();
        cpu.set_current_thread(Some(ThreadId(7)));
        assert_can_sleep(&cpu);
        assert_eq!(cpu.current_thread(), Some(ThreadId(7)));
    }

    #[test]
    #[should_panic(expected = "holding a spinlock")]
    fn sleeping_with_spinlock_panics() {
        let cpu = CpuState::new();
        cpu.acquire_spinlock();
        assert_can_sleep(&cpu);
    }

    #[test]
    #[should_panic(expected = "interrupt handler")]
    fn sleeping_in_interrupt_panics() {
        let cpu = CpuState::new();
        cpu.set_in_interrupt(true);
        assert_can_sleep(&cpu);
    }

    #[test]
    fn no_checks_before_cpus_exist() {
        let cpu = CpuState::early_boot();
        cpu.acquire_spinlock();
        cpu.set_in_interrupt(true);
        assert_can_sleep(&cpu);
    }
}
