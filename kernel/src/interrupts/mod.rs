//! Core-local interrupt masking
//!
//! This module provides:
//! - The `InterruptControl` seam over a core's interrupt-enable state
//! - `InterruptGuard`, which masks interrupts for the lifetime of a scope
//! - A software model for tests and a bare-metal x86_64 implementation

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Interrupt-enable state of the executing core.
pub trait InterruptControl {
    /// Masks interrupts, returning whether they were enabled before.
    fn splhigh(&self) -> bool;

    /// Restores the state returned by a matching [`InterruptControl::splhigh`].
    fn splx(&self, previous: bool);

    fn are_enabled(&self) -> bool;
}

impl<T: InterruptControl + ?Sized> InterruptControl for &T {
    fn splhigh(&self) -> bool {
        (**self).splhigh()
    }

    fn splx(&self, previous: bool) {
        (**self).splx(previous)
    }

    fn are_enabled(&self) -> bool {
        (**self).are_enabled()
    }
}

/// Keeps interrupts masked on this core until dropped.
pub struct InterruptGuard<'a, I: InterruptControl + ?Sized> {
    irq: &'a I,
    previous: bool,
}

impl<'a, I: InterruptControl + ?Sized> InterruptGuard<'a, I> {
    pub fn new(irq: &'a I) -> Self {
        let previous = irq.splhigh();
        InterruptGuard { irq, previous }
    }
}

impl<I: InterruptControl + ?Sized> Drop for InterruptGuard<'_, I> {
    fn drop(&mut self) {
        self.irq.splx(self.previous);
    }
}

/// Executes a closure with interrupts disabled.
///
/// # Returns
/// Returns the result of the closure
pub fn without_interrupts<I, F, R>(irq: &I, f: F) -> R
where
    I: InterruptControl + ?Sized,
    F: FnOnce() -> R,
{
    let _guard = InterruptGuard::new(irq);
    f()
}

/// Software interrupt mask, for hosts and tests.
///
/// Counts how many masked sections were entered so callers can check that a
/// path really ran with interrupts off.
#[derive(Debug)]
pub struct SoftInterrupts {
    enabled: AtomicBool,
    masked_sections: AtomicUsize,
}

impl Default for SoftInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftInterrupts {
    pub const fn new() -> Self {
        SoftInterrupts {
            enabled: AtomicBool::new(true),
            masked_sections: AtomicUsize::new(0),
        }
    }

    pub fn masked_sections(&self) -> usize {
        self.masked_sections.load(Ordering::SeqCst)
    }
}

impl InterruptControl for SoftInterrupts {
    fn splhigh(&self) -> bool {
        self.masked_sections.fetch_add(1, Ordering::SeqCst);
        self.enabled.swap(false, Ordering::SeqCst)
    }

    fn splx(&self, previous: bool) {
        self.enabled.store(previous, Ordering::SeqCst);
    }

    fn are_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// The executing core's real interrupt flag.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub struct CpuInterrupts;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl InterruptControl for CpuInterrupts {
    fn splhigh(&self) -> bool {
        let previous = x86_64::instructions::interrupts::are_enabled();
        x86_64::instructions::interrupts::disable();
        previous
    }

    fn splx(&self, previous: bool) {
        if previous {
            x86_64::instructions::interrupts::enable();
        }
    }

    fn are_enabled(&self) -> bool {
        x86_64::instructions::interrupts::are_enabled()
    }
}
