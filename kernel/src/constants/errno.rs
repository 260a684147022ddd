//! Kernel status codes handed back to the trap and syscall layers.

/// Function not implemented.
pub const ENOSYS: i32 = 1;
/// Out of memory.
pub const ENOMEM: i32 = 3;
/// Bad memory reference.
pub const EFAULT: i32 = 6;
/// Invalid argument.
pub const EINVAL: i32 = 8;
