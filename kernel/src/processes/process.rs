use core::sync::atomic::{AtomicU32, Ordering};

use crate::{
    interrupts::InterruptControl,
    memory::{AddressSpace, Mmu, TranslationCache, VmError},
};

// process counter must be thread-safe
static NEXT_PID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Running,
    Terminated,
}

/// The part of a process the VM subsystem looks at.
pub struct Process {
    pid: u32,
    state: ProcessState,
    address_space: Option<AddressSpace>,
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl Process {
    /// Creates a process with no address space yet.
    pub fn new() -> Self {
        Process {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            state: ProcessState::New,
            address_space: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn address_space(&self) -> Option<&AddressSpace> {
        self.address_space.as_ref()
    }

    pub fn address_space_mut(&mut self) -> Option<&mut AddressSpace> {
        self.address_space.as_mut()
    }

    /// Installs `space` as the current address space, returning the old one.
    pub fn set_address_space(&mut self, space: Option<AddressSpace>) -> Option<AddressSpace> {
        core::mem::replace(&mut self.address_space, space)
    }

    /// Switches the core owning `mmu` to this process's translations.
    pub fn activate<T: TranslationCache, I: InterruptControl>(&mut self, mmu: &mut Mmu<T, I>) {
        if let Some(space) = &self.address_space {
            space.activate(mmu);
        }
        self.state = ProcessState::Running;
    }

    /// Child with a private copy of this process's address space.
    pub fn fork(&self) -> Result<Process, VmError> {
        let space = self.address_space().ok_or(VmError::NoAddressSpace)?;
        let mut child = Process::new();
        child.address_space = Some(space.copy()?);
        crate::debug!("process {} forked into {}", self.pid, child.pid);
        Ok(child)
    }

    /// Tears down the address space, returning its frames.
    pub fn exit(&mut self) {
        if let Some(space) = self.set_address_space(None) {
            space.deactivate();
            space.destroy();
        }
        self.state = ProcessState::Terminated;
    }
}
