use x86_64::VirtAddr;

use crate::constants::errno::{EFAULT, EINVAL, ENOMEM, ENOSYS};

/// Failures reported by the VM subsystem.
///
/// Design-invariant violations (misalignment, double prepare, frame table
/// corruption, TLB exhaustion, shootdown requests) are not represented here:
/// they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Not enough contiguous frames for the request.
    OutOfMemory,
    /// Both program-region slots are already defined.
    TooManyRegions,
    /// A region of zero bytes was requested.
    EmptyRegion,
    /// The trap reported a fault code this handler does not know.
    InvalidFaultType(u32),
    /// A fault arrived with no current process, probably early in boot.
    NoProcess,
    /// The current process has no address space installed.
    NoAddressSpace,
    /// The faulting address lies outside every region of the address space.
    AddressFault(VirtAddr),
    /// `bootstrap` was called on an already initialized frame table.
    AlreadyBootstrapped,
}

impl VmError {
    /// Status code handed back to the trap and syscall layers.
    pub fn errno(&self) -> i32 {
        match self {
            VmError::OutOfMemory => ENOMEM,
            VmError::TooManyRegions => ENOSYS,
            VmError::EmptyRegion | VmError::InvalidFaultType(_) | VmError::AlreadyBootstrapped => {
                EINVAL
            }
            VmError::NoProcess | VmError::NoAddressSpace | VmError::AddressFault(_) => EFAULT,
        }
    }

    /// Whether the trap layer should halt instead of delivering the fault to
    /// the faulting process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::NoProcess | VmError::NoAddressSpace)
    }
}

impl core::fmt::Display for VmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::OutOfMemory => write!(f, "Out of physical frames"),
            VmError::TooManyRegions => write!(f, "Too many regions (at most two supported)"),
            VmError::EmptyRegion => write!(f, "Region has zero length"),
            VmError::InvalidFaultType(code) => write!(f, "Invalid fault type {}", code),
            VmError::NoProcess => write!(f, "Fault with no current process"),
            VmError::NoAddressSpace => write!(f, "Fault with no address space"),
            VmError::AddressFault(addr) => write!(f, "Address fault at {:#x}", addr.as_u64()),
            VmError::AlreadyBootstrapped => write!(f, "Frame table already initialized"),
        }
    }
}
